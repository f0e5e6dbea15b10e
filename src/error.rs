use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Request,
    Fetch,
    Selection,
    Assembly,
    Signing,
    Validation,
    Serialization,
    Broadcast,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Request => "request",
            Stage::Fetch => "fetch",
            Stage::Selection => "selection",
            Stage::Assembly => "assembly",
            Stage::Signing => "signing",
            Stage::Validation => "validation",
            Stage::Serialization => "serialization",
            Stage::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// How a caller is expected to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request: bad address, key or amount.
    Request,
    /// No spendable outputs yet; retry after funding or confirmations.
    InputAvailability,
    /// Terminal for this amount.
    FundSufficiency,
    /// Key mismatch or signing defect. Never retried.
    Cryptographic,
    /// Transient provider failure; the whole pipeline may be rerun.
    Network,
    /// The transaction may already be on the network; look it up by id.
    OutcomeUnknown,
}

/// Transport-level failures of the UTXO provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Failures reading the binary's input file or writing its output.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown chain identifier: {0}")]
    UnknownChain(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("UTXO fetch failed: {0}")]
    UtxoFetch(#[source] ProviderError),

    #[error("No UTXOs available")]
    NoUtxos,

    #[error("No usable UTXOs (all are dust)")]
    NoUsableUtxos,

    #[error("Insufficient funds: available {available} sats, required {required} sats")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid UTXO selection: {0}")]
    InvalidSelection(String),

    #[error("unsupported locking script for input {input_index}: {script_hex}")]
    UnsupportedScript { input_index: usize, script_hex: String },

    #[error("sighash computation failed for input {input_index}: {reason}")]
    Sighash { input_index: usize, reason: String },

    #[error("signing failed for input {input_index}: {reason}")]
    Signing { input_index: usize, reason: String },

    #[error("Invalid signature for input {input_index}")]
    InvalidSignature { input_index: usize },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Broadcast submitted, outcome unknown for {txid}: {reason}")]
    BroadcastOutcomeUnknown {
        txid: String,
        raw_tx_hex: String,
        reason: String,
    },
}

impl EngineError {
    pub fn stage(&self) -> Stage {
        match self {
            EngineError::UnknownChain(_)
            | EngineError::InvalidRequest(_)
            | EngineError::InvalidAddress { .. }
            | EngineError::InvalidPrivateKey(_) => Stage::Request,
            EngineError::UtxoFetch(_) | EngineError::NoUtxos => Stage::Fetch,
            EngineError::NoUsableUtxos
            | EngineError::InsufficientFunds { .. }
            | EngineError::InvalidSelection(_) => Stage::Selection,
            EngineError::UnsupportedScript { .. } => Stage::Assembly,
            EngineError::Sighash { .. } | EngineError::Signing { .. } => Stage::Signing,
            EngineError::InvalidSignature { .. } => Stage::Validation,
            EngineError::Serialization(_) => Stage::Serialization,
            EngineError::BroadcastFailed(_) | EngineError::BroadcastOutcomeUnknown { .. } => {
                Stage::Broadcast
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownChain(_)
            | EngineError::InvalidRequest(_)
            | EngineError::InvalidAddress { .. }
            | EngineError::InvalidPrivateKey(_)
            | EngineError::UnsupportedScript { .. } => ErrorKind::Request,
            EngineError::NoUtxos | EngineError::NoUsableUtxos => ErrorKind::InputAvailability,
            EngineError::InsufficientFunds { .. } => ErrorKind::FundSufficiency,
            EngineError::InvalidSelection(_)
            | EngineError::Sighash { .. }
            | EngineError::Signing { .. }
            | EngineError::InvalidSignature { .. }
            | EngineError::Serialization(_) => ErrorKind::Cryptographic,
            EngineError::UtxoFetch(_) | EngineError::BroadcastFailed(_) => ErrorKind::Network,
            EngineError::BroadcastOutcomeUnknown { .. } => ErrorKind::OutcomeUnknown,
        }
    }

    /// Whether rerunning the whole pipeline from a fresh UTXO fetch is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InputAvailability | ErrorKind::Network
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_cause() {
        assert_eq!(EngineError::NoUtxos.to_string(), "No UTXOs available");
        assert_eq!(
            EngineError::InvalidSignature { input_index: 2 }.to_string(),
            "Invalid signature for input 2"
        );
        assert_eq!(
            EngineError::BroadcastFailed("txn-mempool-conflict".into()).to_string(),
            "Broadcast failed: txn-mempool-conflict"
        );
    }

    #[test]
    fn taxonomy_drives_retry_policy() {
        assert!(EngineError::NoUsableUtxos.is_retryable());
        assert!(EngineError::BroadcastFailed("timeout".into()).is_retryable());
        assert!(!EngineError::InvalidSignature { input_index: 0 }.is_retryable());
        assert!(
            !EngineError::InsufficientFunds {
                available: 1,
                required: 2
            }
            .is_retryable()
        );
        let unknown = EngineError::BroadcastOutcomeUnknown {
            txid: "ab".into(),
            raw_tx_hex: "00".into(),
            reason: "timed out".into(),
        };
        assert!(!unknown.is_retryable());
        assert_eq!(unknown.stage(), Stage::Broadcast);
    }
}
