//! Transaction assembly, signing, verification and serialization.
//!
//! Each stage is its own type and consumes the previous one, so a
//! transaction cannot reach [`SerializedTransaction`] without every input
//! having been signed and then re-verified:
//!
//! `UnsignedTransaction -> SignedTransaction -> ValidatedTransaction -> SerializedTransaction`

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::hashes::{Hash, sha256d};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, Signing, Verification, ecdsa};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};

use crate::error::EngineError;
use crate::network::NetworkParams;
use crate::secret::{SecretKeyBytes, SigningKey};
use crate::selector::{SelectionResult, validate_selection};
use crate::types::ScriptType;

const SIGHASH_FORKID: u32 = 0x40;

/// Previous output data needed to sign and verify one input.
#[derive(Debug, Clone)]
struct PrevOut {
    script_pubkey: ScriptBuf,
    value: Amount,
    script_type: ScriptType,
}

/// Sighash type byte used for every input on this chain.
pub fn sighash_flag(params: &NetworkParams) -> u32 {
    let all = EcdsaSighashType::All.to_u32();
    match params.fork_id {
        Some(fork_id) => all | SIGHASH_FORKID | (fork_id << 8),
        None => all,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionBuilder {
    params: &'static NetworkParams,
}

impl TransactionBuilder {
    pub fn new(params: &'static NetworkParams) -> Self {
        TransactionBuilder { params }
    }

    /// Spends `selection.inputs`, pays `selection.target` to `recipient` and
    /// adds a change output only when `selection.change > 0`.
    pub fn assemble(
        &self,
        selection: &SelectionResult,
        recipient: ScriptBuf,
        change: ScriptBuf,
    ) -> Result<UnsignedTransaction, EngineError> {
        validate_selection(selection, selection.target)?;

        let mut inputs = Vec::with_capacity(selection.inputs.len());
        let mut prevouts = Vec::with_capacity(selection.inputs.len());
        for (input_index, utxo) in selection.inputs.iter().enumerate() {
            let script_type = ScriptType::from_script(&utxo.script_pubkey)
                .filter(|t| !t.is_witness() || self.params.segwit)
                .ok_or_else(|| EngineError::UnsupportedScript {
                    input_index,
                    script_hex: utxo.script_pubkey.to_hex_string(),
                })?;
            log::debug!(
                "input {}: {}:{} value={} type={:?}",
                input_index,
                utxo.txid,
                utxo.vout,
                utxo.value,
                script_type
            );
            inputs.push(TxIn {
                previous_output: utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
            prevouts.push(PrevOut {
                script_pubkey: utxo.script_pubkey.clone(),
                value: Amount::from_sat(utxo.value),
                script_type,
            });
        }

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(selection.target),
            script_pubkey: recipient,
        }];
        if selection.change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(selection.change),
                script_pubkey: change,
            });
        }

        Ok(UnsignedTransaction {
            tx: Transaction {
                version: Version::TWO,
                lock_time: LockTime::ZERO,
                input: inputs,
                output: outputs,
            },
            prevouts,
            params: self.params,
            fee: selection.fee,
        })
    }
}

#[derive(Debug)]
pub struct UnsignedTransaction {
    tx: Transaction,
    prevouts: Vec<PrevOut>,
    params: &'static NetworkParams,
    fee: u64,
}

impl UnsignedTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Signs every input in index order. `key` is consumed and wiped on return,
    /// on success and on every error path.
    pub fn sign<C: Signing>(
        mut self,
        key: SecretKeyBytes,
        secp: &Secp256k1<C>,
    ) -> Result<SignedTransaction, EngineError> {
        let signing_key = SigningKey::new(secp, &key)?;
        drop(key);
        let public_key = signing_key.public_key();
        let flag = sighash_flag(self.params);

        // Digests first: the cache borrows the transaction immutably.
        let digests = {
            let mut cache = SighashCache::new(&self.tx);
            self.prevouts
                .iter()
                .enumerate()
                .map(|(i, prev)| signature_digest(&mut cache, &self.tx, i, prev, self.params))
                .collect::<Result<Vec<Message>, EngineError>>()?
        };

        for (input_index, digest) in digests.iter().enumerate() {
            let signature = signing_key.sign(secp, digest);
            let mut sig_bytes = signature.serialize_der().to_vec();
            sig_bytes.push(flag as u8);

            let input = &mut self.tx.input[input_index];
            match self.prevouts[input_index].script_type {
                ScriptType::P2PKH => {
                    input.script_sig = p2pkh_script_sig(sig_bytes, &public_key)
                        .map_err(|reason| EngineError::Signing {
                            input_index,
                            reason,
                        })?;
                }
                ScriptType::P2WPKH => {
                    let mut witness = Witness::new();
                    witness.push(sig_bytes);
                    witness.push(public_key.to_bytes());
                    input.witness = witness;
                }
            }
            log::debug!("input {} signed", input_index);
        }
        drop(signing_key);

        log::info!("signed {} inputs", self.tx.input.len());
        Ok(SignedTransaction {
            tx: self.tx,
            prevouts: self.prevouts,
            params: self.params,
            fee: self.fee,
        })
    }
}

#[derive(Debug)]
pub struct SignedTransaction {
    tx: Transaction,
    prevouts: Vec<PrevOut>,
    params: &'static NetworkParams,
    fee: u64,
}

impl SignedTransaction {
    #[cfg(test)]
    pub(crate) fn transaction_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }

    /// Re-verifies every input against its locking script. The first
    /// failure aborts with [`EngineError::InvalidSignature`].
    pub fn validate<C: Verification>(
        self,
        secp: &Secp256k1<C>,
    ) -> Result<ValidatedTransaction, EngineError> {
        let flag = sighash_flag(self.params);
        {
            let mut cache = SighashCache::new(&self.tx);
            for (input_index, prev) in self.prevouts.iter().enumerate() {
                let digest = signature_digest(&mut cache, &self.tx, input_index, prev, self.params)?;
                let input = &self.tx.input[input_index];
                let pushes = match prev.script_type {
                    ScriptType::P2PKH => script_sig_pushes(&input.script_sig),
                    ScriptType::P2WPKH => witness_pushes(&input.witness),
                };
                let valid = pushes
                    .map(|(sig, pk)| verify_input(secp, &digest, &sig, &pk, prev, flag))
                    .unwrap_or(false);
                if !valid {
                    log::error!("signature check failed for input {}", input_index);
                    return Err(EngineError::InvalidSignature { input_index });
                }
            }
        }

        log::info!("all {} input signatures verified", self.tx.input.len());
        Ok(ValidatedTransaction {
            tx: self.tx,
            fee: self.fee,
        })
    }
}

#[derive(Debug)]
pub struct ValidatedTransaction {
    tx: Transaction,
    fee: u64,
}

impl ValidatedTransaction {
    pub fn serialize(self) -> Result<SerializedTransaction, EngineError> {
        let raw = encode::serialize(&self.tx);
        let txid = self.tx.compute_txid();

        let decoded: Transaction = encode::deserialize(&raw)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        if decoded.compute_txid() != txid {
            return Err(EngineError::Serialization(
                "re-decoded transaction has a different txid".to_string(),
            ));
        }

        let vsize = self.tx.vsize();
        log::info!("serialized {}: {} bytes, {} vbytes", txid, raw.len(), vsize);
        Ok(SerializedTransaction {
            tx: self.tx,
            raw,
            txid,
            vsize,
            fee: self.fee,
        })
    }
}

/// Final wire form, ready for broadcast.
#[derive(Debug, Clone)]
pub struct SerializedTransaction {
    pub tx: Transaction,
    pub raw: Vec<u8>,
    pub txid: Txid,
    pub vsize: usize,
    pub fee: u64,
}

impl SerializedTransaction {
    pub fn hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

fn signature_digest(
    cache: &mut SighashCache<&Transaction>,
    tx: &Transaction,
    input_index: usize,
    prev: &PrevOut,
    params: &NetworkParams,
) -> Result<Message, EngineError> {
    let sighash_err = |reason: String| EngineError::Sighash {
        input_index,
        reason,
    };
    let digest = match (prev.script_type, params.fork_id) {
        (ScriptType::P2WPKH, _) => cache
            .p2wpkh_signature_hash(
                input_index,
                &prev.script_pubkey,
                prev.value,
                EcdsaSighashType::All,
            )
            .map_err(|e| sighash_err(e.to_string()))?
            .to_byte_array(),
        (ScriptType::P2PKH, Some(_)) => fork_id_digest(
            tx,
            input_index,
            &prev.script_pubkey,
            prev.value,
            sighash_flag(params),
        )
        .map_err(sighash_err)?,
        (ScriptType::P2PKH, None) => cache
            .legacy_signature_hash(input_index, &prev.script_pubkey, sighash_flag(params))
            .map_err(|e| sighash_err(e.to_string()))?
            .to_byte_array(),
    };
    Ok(Message::from_digest(digest))
}

/// BIP143-layout digest used with `SIGHASH_FORKID` (Bitcoin Cash replay protection).
fn fork_id_digest(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    sighash_type: u32,
) -> Result<[u8; 32], String> {
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| format!("input index {} out of range", input_index))?;

    let mut prevouts = Vec::with_capacity(36 * tx.input.len());
    let mut sequences = Vec::with_capacity(4 * tx.input.len());
    for txin in &tx.input {
        prevouts.extend(encode::serialize(&txin.previous_output));
        sequences.extend(txin.sequence.0.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for txout in &tx.output {
        outputs.extend(encode::serialize(txout));
    }

    let mut preimage = Vec::with_capacity(256);
    preimage.extend(tx.version.0.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&prevouts).to_byte_array());
    preimage.extend(sha256d::Hash::hash(&sequences).to_byte_array());
    preimage.extend(encode::serialize(&input.previous_output));
    preimage.extend(encode::serialize(&script_code.to_bytes()));
    preimage.extend(value.to_sat().to_le_bytes());
    preimage.extend(input.sequence.0.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&outputs).to_byte_array());
    preimage.extend(tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend(sighash_type.to_le_bytes());

    Ok(sha256d::Hash::hash(&preimage).to_byte_array())
}

fn p2pkh_script_sig(sig_bytes: Vec<u8>, public_key: &CompressedPublicKey) -> Result<ScriptBuf, String> {
    let sig = PushBytesBuf::try_from(sig_bytes).map_err(|e| e.to_string())?;
    let key = PushBytesBuf::try_from(public_key.to_bytes().to_vec()).map_err(|e| e.to_string())?;
    Ok(Builder::new().push_slice(sig).push_slice(key).into_script())
}

fn script_sig_pushes(script_sig: &Script) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut pushes = script_sig.instructions().map(|ins| match ins {
        Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
        _ => None,
    });
    let sig = pushes.next()??;
    let key = pushes.next()??;
    if pushes.next().is_some() {
        return None;
    }
    Some((sig, key))
}

fn witness_pushes(witness: &Witness) -> Option<(Vec<u8>, Vec<u8>)> {
    if witness.len() != 2 {
        return None;
    }
    Some((witness.nth(0)?.to_vec(), witness.nth(1)?.to_vec()))
}

fn verify_input<C: Verification>(
    secp: &Secp256k1<C>,
    digest: &Message,
    sig_bytes: &[u8],
    key_bytes: &[u8],
    prev: &PrevOut,
    flag: u32,
) -> bool {
    let Some((&hash_type, der)) = sig_bytes.split_last() else {
        return false;
    };
    if u32::from(hash_type) != flag {
        return false;
    }
    let Ok(public_key) = CompressedPublicKey::from_slice(key_bytes) else {
        return false;
    };
    let locking_script = match prev.script_type {
        ScriptType::P2PKH => ScriptBuf::new_p2pkh(&public_key.pubkey_hash()),
        ScriptType::P2WPKH => ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()),
    };
    if locking_script != prev.script_pubkey {
        return false;
    }
    let Ok(signature) = ecdsa::Signature::from_der(der) else {
        return false;
    };
    secp.verify_ecdsa(digest, &signature, &public_key.0).is_ok()
}
