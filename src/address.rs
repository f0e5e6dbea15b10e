//! Address <-> locking script conversion under a chain's [`NetworkParams`].
//!
//! The `bitcoin` crate only knows Bitcoin's own prefixes, so decoding is done
//! here from the raw encodings: Base58Check with the chain's version bytes,
//! segwit bech32/bech32m with the chain's HRP, and CashAddr for Bitcoin Cash.

use bitcoin::bech32::{self, Hrp};
use bitcoin::hashes::Hash;
use bitcoin::{CompressedPublicKey, PubkeyHash, ScriptBuf, ScriptHash};

use crate::error::EngineError;
use crate::network::NetworkParams;

const HASH160_LEN: usize = 20;

/// Output script paying to `address` on the chain described by `params`.
pub fn script_pubkey_for(address: &str, params: &NetworkParams) -> Result<ScriptBuf, EngineError> {
    let address = address.trim();
    let invalid = |reason: String| EngineError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    if let Some(prefix) = params.cashaddr_prefix {
        if looks_like_cashaddr(address, prefix) {
            let (kind, hash) = cashaddr::decode(address, prefix).map_err(invalid)?;
            return Ok(match kind {
                cashaddr::P2PKH => ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)),
                _ => ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)),
            });
        }
    }

    if let Some(hrp) = params.bech32_hrp {
        let lower = address.to_lowercase();
        if lower.starts_with(&format!("{}1", hrp)) {
            return witness_script(address, hrp).map_err(invalid);
        }
    }

    let payload = bitcoin::base58::decode_check(address)
        .map_err(|e| invalid(format!("base58check decode failed: {}", e)))?;
    if payload.len() != 1 + HASH160_LEN {
        return Err(invalid(format!("unexpected payload length {}", payload.len())));
    }
    let mut hash = [0u8; HASH160_LEN];
    hash.copy_from_slice(&payload[1..]);

    match payload[0] {
        v if v == params.pubkey_hash => Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash))),
        v if v == params.script_hash => Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash))),
        v => Err(invalid(format!(
            "version byte 0x{:02x} does not belong to {}",
            v, params.chain
        ))),
    }
}

/// Receive address for `public_key`: P2WPKH on SegWit chains, CashAddr P2PKH on
/// Bitcoin Cash, Base58Check P2PKH elsewhere.
pub fn address_for_key(
    public_key: &CompressedPublicKey,
    params: &NetworkParams,
) -> Result<String, EngineError> {
    let encode_err = |reason: String| EngineError::InvalidRequest(format!("address encoding: {}", reason));

    if params.segwit {
        if let Some(hrp) = params.bech32_hrp {
            let hrp = Hrp::parse(hrp).map_err(|e| encode_err(e.to_string()))?;
            let program = public_key.wpubkey_hash();
            return bech32::segwit::encode(hrp, bech32::segwit::VERSION_0, program.as_byte_array())
                .map_err(|e| encode_err(e.to_string()));
        }
    }

    let hash = public_key.pubkey_hash();
    if let Some(prefix) = params.cashaddr_prefix {
        return Ok(cashaddr::encode(prefix, cashaddr::P2PKH, hash.as_byte_array()));
    }

    let mut payload = Vec::with_capacity(1 + HASH160_LEN);
    payload.push(params.pubkey_hash);
    payload.extend_from_slice(hash.as_byte_array());
    Ok(bitcoin::base58::encode_check(&payload))
}

fn looks_like_cashaddr(address: &str, prefix: &str) -> bool {
    match address.split_once(':') {
        Some((p, _)) => p.eq_ignore_ascii_case(prefix),
        None => matches!(address.chars().next(), Some('q' | 'p' | 'Q' | 'P')),
    }
}

fn witness_script(address: &str, expected_hrp: &str) -> Result<ScriptBuf, String> {
    let (hrp, version, program) =
        bech32::segwit::decode(address).map_err(|e| format!("bech32 decode failed: {}", e))?;
    if hrp.to_lowercase() != expected_hrp {
        return Err(format!("human-readable part {} is not {}", hrp, expected_hrp));
    }
    let version = version.to_u8();
    if version > 16 || !(2..=40).contains(&program.len()) {
        return Err(format!(
            "invalid witness program (version {}, {} bytes)",
            version,
            program.len()
        ));
    }
    if version == 0 && program.len() != 20 && program.len() != 32 {
        return Err(format!("invalid v0 witness program length {}", program.len()));
    }

    // OP_0 or OP_1..OP_16, then a single push of the program.
    let mut bytes = Vec::with_capacity(2 + program.len());
    bytes.push(if version == 0 { 0x00 } else { 0x50 + version });
    bytes.push(program.len() as u8);
    bytes.extend_from_slice(&program);
    Ok(ScriptBuf::from_bytes(bytes))
}

/// CashAddr (Bitcoin Cash) for 160-bit hashes.
mod cashaddr {
    const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    const CHECKSUM_LEN: usize = 8;

    pub const P2PKH: u8 = 0;
    pub const P2SH: u8 = 1;

    fn polymod(values: impl IntoIterator<Item = u8>) -> u64 {
        let mut c: u64 = 1;
        for d in values {
            let c0 = (c >> 35) as u8;
            c = ((c & 0x07_ffff_ffff) << 5) ^ u64::from(d);
            if c0 & 0x01 != 0 {
                c ^= 0x98_f2bc_8e61;
            }
            if c0 & 0x02 != 0 {
                c ^= 0x79_b76d_99e2;
            }
            if c0 & 0x04 != 0 {
                c ^= 0xf3_3e5f_b3c4;
            }
            if c0 & 0x08 != 0 {
                c ^= 0xae_2eab_e2a8;
            }
            if c0 & 0x10 != 0 {
                c ^= 0x1e_4f43_e470;
            }
        }
        c ^ 1
    }

    fn expand_prefix(prefix: &str) -> impl Iterator<Item = u8> + '_ {
        prefix.bytes().map(|b| b & 0x1f).chain(std::iter::once(0))
    }

    fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;
        let max = (1u32 << to) - 1;
        let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
        for &value in data {
            let value = u32::from(value);
            if value >> from != 0 {
                return None;
            }
            acc = (acc << from) | value;
            bits += from;
            while bits >= to {
                bits -= to;
                out.push(((acc >> bits) & max) as u8);
            }
        }
        if pad {
            if bits > 0 {
                out.push(((acc << (to - bits)) & max) as u8);
            }
        } else if bits >= from || ((acc << (to - bits)) & max) != 0 {
            return None;
        }
        Some(out)
    }

    pub fn encode(prefix: &str, kind: u8, hash: &[u8; 20]) -> String {
        let mut payload = Vec::with_capacity(21);
        // Size bits 0 = 160-bit hash.
        payload.push(kind << 3);
        payload.extend_from_slice(hash);
        let mut data = convert_bits(&payload, 8, 5, true).unwrap_or_default();

        let checksum = polymod(
            expand_prefix(prefix)
                .chain(data.iter().copied())
                .chain([0u8; CHECKSUM_LEN]),
        );
        for i in 0..CHECKSUM_LEN {
            data.push(((checksum >> (5 * (CHECKSUM_LEN - 1 - i))) & 0x1f) as u8);
        }

        let body: String = data.iter().map(|&d| CHARSET[d as usize] as char).collect();
        format!("{}:{}", prefix, body)
    }

    pub fn decode(address: &str, prefix: &str) -> Result<(u8, [u8; 20]), String> {
        let body = match address.split_once(':') {
            Some((p, body)) if p.eq_ignore_ascii_case(prefix) => body,
            Some((p, _)) => return Err(format!("prefix {} is not {}", p, prefix)),
            None => address,
        };
        let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err("mixed-case cashaddr".to_string());
        }

        let values = body
            .to_ascii_lowercase()
            .bytes()
            .map(|b| {
                CHARSET
                    .iter()
                    .position(|&c| c == b)
                    .map(|p| p as u8)
                    .ok_or_else(|| format!("invalid cashaddr character {:?}", b as char))
            })
            .collect::<Result<Vec<u8>, String>>()?;
        if values.len() <= CHECKSUM_LEN {
            return Err("cashaddr too short".to_string());
        }
        let lower_prefix = prefix.to_ascii_lowercase();
        if polymod(expand_prefix(&lower_prefix).chain(values.iter().copied())) != 0 {
            return Err("cashaddr checksum mismatch".to_string());
        }

        let payload = convert_bits(&values[..values.len() - CHECKSUM_LEN], 5, 8, false)
            .ok_or_else(|| "invalid cashaddr padding".to_string())?;
        let (version, hash) = payload
            .split_first()
            .ok_or_else(|| "empty cashaddr payload".to_string())?;
        if version & 0x80 != 0 || version & 0x07 != 0 || hash.len() != 20 {
            return Err(format!("unsupported cashaddr version byte 0x{:02x}", version));
        }
        let kind = (version >> 3) & 0x0f;
        if kind != P2PKH && kind != P2SH {
            return Err(format!("unsupported cashaddr type {}", kind));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(hash);
        Ok((kind, out))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Address, Network};

    use super::*;
    use crate::network::Chain;

    fn test_key() -> CompressedPublicKey {
        let secp = Secp256k1::new();
        CompressedPublicKey(SecretKey::from_slice(&[0x11; 32]).unwrap().public_key(&secp))
    }

    fn bitcoin_crate_script(address: &str) -> ScriptBuf {
        Address::from_str(address).unwrap().assume_checked().script_pubkey()
    }

    #[test]
    fn bitcoin_addresses_match_bitcoin_crate() {
        let params = Chain::Bitcoin.params();
        for address in [
            "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2",
            "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3",
            "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0",
        ] {
            assert_eq!(
                script_pubkey_for(address, params).unwrap(),
                bitcoin_crate_script(address),
                "{}",
                address
            );
        }
    }

    #[test]
    fn derived_bitcoin_address_matches_bitcoin_crate() {
        let pk = test_key();
        let expected = Address::p2wpkh(&pk, Network::Bitcoin).to_string();
        assert_eq!(address_for_key(&pk, Chain::Bitcoin.params()).unwrap(), expected);
    }

    #[test]
    fn litecoin_addresses_round_trip() {
        let params = Chain::Litecoin.params();
        let pk = test_key();
        let address = address_for_key(&pk, params).unwrap();
        assert!(address.starts_with("ltc1q"));
        assert_eq!(
            script_pubkey_for(&address, params).unwrap(),
            ScriptBuf::new_p2wpkh(&pk.wpubkey_hash())
        );

        let mut payload = vec![params.pubkey_hash];
        payload.extend_from_slice(pk.pubkey_hash().as_byte_array());
        let legacy = bitcoin::base58::encode_check(&payload);
        assert!(legacy.starts_with('L'));
        assert_eq!(
            script_pubkey_for(&legacy, params).unwrap(),
            ScriptBuf::new_p2pkh(&pk.pubkey_hash())
        );
    }

    #[test]
    fn dogecoin_uses_legacy_addresses() {
        let params = Chain::Dogecoin.params();
        let pk = test_key();
        let address = address_for_key(&pk, params).unwrap();
        assert!(address.starts_with('D'));
        assert_eq!(
            script_pubkey_for(&address, params).unwrap(),
            ScriptBuf::new_p2pkh(&pk.pubkey_hash())
        );
    }

    #[test]
    fn rejects_addresses_of_other_chains() {
        let btc = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
        assert!(matches!(
            script_pubkey_for(btc, Chain::Litecoin.params()),
            Err(EngineError::InvalidAddress { .. })
        ));
        assert!(script_pubkey_for(btc, Chain::Dogecoin.params()).is_err());
        // No witness addresses on Dogecoin.
        assert!(
            script_pubkey_for("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", Chain::Dogecoin.params())
                .is_err()
        );
        let ltc = address_for_key(&test_key(), Chain::Litecoin.params()).unwrap();
        assert!(script_pubkey_for(&ltc, Chain::Bitcoin.params()).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        assert!(script_pubkey_for("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN3", Chain::Bitcoin.params()).is_err());
    }

    #[test]
    fn cashaddr_matches_legacy_form() {
        let params = Chain::BitcoinCash.params();
        let legacy = script_pubkey_for("1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu", params).unwrap();
        assert_eq!(
            script_pubkey_for("bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a", params).unwrap(),
            legacy
        );
        assert_eq!(
            script_pubkey_for("qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a", params).unwrap(),
            legacy
        );
        assert_eq!(
            script_pubkey_for("BITCOINCASH:QPM2QSZNHKS23Z7629MMS6S4CWEF74VCWVY22GDX6A", params).unwrap(),
            legacy
        );
    }

    #[test]
    fn cashaddr_round_trip_and_checksum() {
        let params = Chain::BitcoinCash.params();
        let pk = test_key();
        let address = address_for_key(&pk, params).unwrap();
        assert!(address.starts_with("bitcoincash:q"));
        assert_eq!(
            script_pubkey_for(&address, params).unwrap(),
            ScriptBuf::new_p2pkh(&pk.pubkey_hash())
        );

        let p2sh = cashaddr::encode("bitcoincash", cashaddr::P2SH, &[7u8; 20]);
        assert!(p2sh.starts_with("bitcoincash:p"));
        assert_eq!(
            script_pubkey_for(&p2sh, params).unwrap(),
            ScriptBuf::new_p2sh(&ScriptHash::from_byte_array([7u8; 20]))
        );

        let mut corrupted = address.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == 'q' { 'p' } else { 'q' });
        assert!(script_pubkey_for(&corrupted, params).is_err());
    }
}
