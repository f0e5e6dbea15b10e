use bitcoin::{OutPoint, Script, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorKind, Stage};
use crate::network::Chain;
use crate::secret::SecretKeyBytes;

/// A spendable output as reported by the UTXO provider.
///
/// Field names follow the provider wire format (`transaction_hash`, `index`,
/// `value`, `script_hex`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    #[serde(rename = "transaction_hash")]
    pub txid: Txid,
    #[serde(rename = "index")]
    pub vout: u32,
    /// Value in the chain's smallest unit.
    pub value: u64,
    #[serde(rename = "script_hex", with = "script_hex")]
    pub script_pubkey: ScriptBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u32>,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

mod script_hex {
    use bitcoin::ScriptBuf;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(script: &ScriptBuf, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(script.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ScriptBuf, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(ScriptBuf::from_bytes)
            .map_err(serde::de::Error::custom)
    }
}

/// Locking script kinds the signer knows how to satisfy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptType {
    P2PKH,
    P2WPKH,
}

impl ScriptType {
    pub fn from_script(script: &Script) -> Option<Self> {
        if script.is_p2pkh() {
            Some(ScriptType::P2PKH)
        } else if script.is_p2wpkh() {
            Some(ScriptType::P2WPKH)
        } else {
            None
        }
    }

    pub fn is_witness(&self) -> bool {
        matches!(self, ScriptType::P2WPKH)
    }
}

/// One send operation. Owns the key material until the signer consumes it.
#[derive(Debug)]
pub struct TransactionRequest {
    pub chain: Chain,
    pub from_address: String,
    pub to_address: String,
    /// Amount to pay the recipient, in the smallest unit.
    pub amount: u64,
    /// Satoshis per virtual byte.
    pub fee_rate: u64,
    pub private_key: SecretKeyBytes,
    /// Defaults to `from_address`.
    pub change_address: Option<String>,
}

impl TransactionRequest {
    pub fn change_address(&self) -> &str {
        self.change_address.as_deref().unwrap_or(&self.from_address)
    }

    pub(crate) fn check(&self) -> Result<(), EngineError> {
        if self.amount == 0 {
            return Err(EngineError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }
        if self.fee_rate == 0 {
            return Err(EngineError::InvalidRequest(
                "fee rate must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Structured outcome handed back to the caller; failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TransactionResult {
    pub fn succeeded(transaction_id: String, raw_transaction: String, fee: u64) -> Self {
        TransactionResult {
            success: true,
            transaction_id: Some(transaction_id),
            raw_transaction: Some(raw_transaction),
            fee: Some(fee),
            error: None,
            stage: None,
            error_kind: None,
        }
    }

    pub fn failed(err: &EngineError) -> Self {
        // An ambiguous broadcast still hands back the id and bytes for lookup.
        let (transaction_id, raw_transaction) = match err {
            EngineError::BroadcastOutcomeUnknown {
                txid, raw_tx_hex, ..
            } => (Some(txid.clone()), Some(raw_tx_hex.clone())),
            _ => (None, None),
        };
        TransactionResult {
            success: false,
            transaction_id,
            raw_transaction,
            fee: None,
            error: Some(format!("{} stage: {}", err.stage(), err)),
            stage: Some(err.stage()),
            error_kind: Some(err.kind()),
        }
    }
}
