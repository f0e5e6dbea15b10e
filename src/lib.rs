//! Build, sign and broadcast pay-to-public-key-hash transactions on Bitcoin,
//! Litecoin, Dogecoin and Bitcoin Cash.

pub mod address;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod provider;
pub mod secret;
pub mod selector;
pub mod transaction;
pub mod types;

pub use config::ProviderConfig;
pub use engine::{Engine, FeeEstimate, SentTransaction};
pub use error::{EngineError, ErrorKind, ProviderError, Stage};
pub use network::{Chain, NetworkParams, is_segwit_chain, params_for};
pub use provider::{BlockchairClient, BroadcastResponse, UtxoProvider};
pub use secret::SecretKeyBytes;
pub use selector::{SelectionRequest, SelectionResult, SelectionStrategy, Selector};
pub use transaction::SerializedTransaction;
pub use types::{TransactionRequest, TransactionResult, UnspentOutput};
