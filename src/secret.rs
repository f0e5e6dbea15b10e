//! Scoped handling of private-key material.
//!
//! [`SecretKeyBytes`] is moved into the signer and wiped when it is dropped,
//! whichever way the pipeline exits. Nothing here implements a revealing
//! `Debug` or `Serialize`.

use bitcoin::CompressedPublicKey;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, Signing, ecdsa};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::EngineError;
use crate::network::NetworkParams;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKeyBytes {
    bytes: Vec<u8>,
}

impl SecretKeyBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        SecretKeyBytes { bytes }
    }

    pub fn from_hex(key_hex: &str) -> Result<Self, EngineError> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| EngineError::InvalidPrivateKey(format!("hex decode failed: {}", e)))?;
        Ok(SecretKeyBytes::new(bytes))
    }

    /// Imports a compressed-key WIF string, checking its prefix against `params.wif`.
    pub fn from_wif(wif: &str, params: &NetworkParams) -> Result<Self, EngineError> {
        let decoded = Zeroizing::new(
            bitcoin::base58::decode_check(wif.trim())
                .map_err(|e| EngineError::InvalidPrivateKey(format!("WIF decode failed: {}", e)))?,
        );
        match decoded.as_slice() {
            [prefix, key @ .., 0x01] if key.len() == 32 => {
                if *prefix != params.wif {
                    return Err(EngineError::InvalidPrivateKey(format!(
                        "WIF prefix 0x{:02x} does not belong to {}",
                        prefix, params.chain
                    )));
                }
                Ok(SecretKeyBytes::new(key.to_vec()))
            }
            [_, key @ ..] if key.len() == 32 => Err(EngineError::InvalidPrivateKey(
                "uncompressed WIF keys are not supported".to_string(),
            )),
            _ => Err(EngineError::InvalidPrivateKey(format!(
                "unexpected WIF payload length {}",
                decoded.len()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKeyBytes(<redacted>)")
    }
}

/// Public key for the given key bytes; the parsed secret is erased before returning.
pub fn public_key_for<C: Signing>(
    secp: &Secp256k1<C>,
    key: &SecretKeyBytes,
) -> Result<CompressedPublicKey, EngineError> {
    SigningKey::new(secp, key).map(|k| k.public_key())
}

/// Parsed secp256k1 key living only for the signing stage.
///
/// Erasure on drop is best effort. `SecretKey` is `Copy`, so copies made by
/// secp256k1 internals or left in moved-from stack slots are not reached.
pub(crate) struct SigningKey {
    secret: SecretKey,
    public: CompressedPublicKey,
}

impl SigningKey {
    pub(crate) fn new<C: Signing>(
        secp: &Secp256k1<C>,
        key: &SecretKeyBytes,
    ) -> Result<Self, EngineError> {
        let secret = SecretKey::from_slice(key.expose())
            .map_err(|e| EngineError::InvalidPrivateKey(e.to_string()))?;
        let public = CompressedPublicKey(secret.public_key(secp));
        Ok(SigningKey { secret, public })
    }

    pub(crate) fn public_key(&self) -> CompressedPublicKey {
        self.public
    }

    pub(crate) fn sign<C: Signing>(&self, secp: &Secp256k1<C>, msg: &Message) -> ecdsa::Signature {
        secp.sign_ecdsa(msg, &self.secret)
    }
}

impl SigningKey {
    fn erase(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.erase();
    }
}
