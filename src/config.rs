use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{ConfigError, EngineError};
use crate::network::Chain;
use crate::secret::SecretKeyBytes;
use crate::types::{TransactionRequest, UnspentOutput};

pub const DEFAULT_BASE_URL: &str = "https://api.blockchair.com";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection settings for the Blockchair provider.
#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Sent as the `key` query parameter when set.
    pub api_key: Option<String>,
    pub fetch_timeout: Duration,
    pub broadcast_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("fetch_timeout", &self.fetch_timeout)
            .field("broadcast_timeout", &self.broadcast_timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Reads `BLOCKCHAIR_*` variables; unset or unparsable values keep the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ProviderConfig::default();
        let secs = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|&s| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        ProviderConfig {
            base_url: lookup("BLOCKCHAIR_BASE_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.base_url),
            api_key: lookup("BLOCKCHAIR_API_KEY").filter(|k| !k.trim().is_empty()),
            fetch_timeout: secs("BLOCKCHAIR_FETCH_TIMEOUT_SECS", defaults.fetch_timeout),
            broadcast_timeout: secs(
                "BLOCKCHAIR_BROADCAST_TIMEOUT_SECS",
                defaults.broadcast_timeout,
            ),
        }
    }
}

/// JSON request file read by `utxo-send`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConfig {
    pub chain: String,
    pub from_address: String,
    pub to_address: String,
    pub amount_sats: u64,
    pub fee_rate_sats_per_vb: u64,
    #[serde(default)]
    pub private_key_hex: Option<Zeroizing<String>>,
    #[serde(default)]
    pub private_key_wif: Option<Zeroizing<String>>,
    #[serde(default)]
    pub change_address: Option<String>,
    /// Inline outputs for offline builds, in the provider wire format.
    #[serde(default)]
    pub utxos: Option<Vec<UnspentOutput>>,
}

impl std::fmt::Debug for InputConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputConfig")
            .field("chain", &self.chain)
            .field("from_address", &self.from_address)
            .field("to_address", &self.to_address)
            .field("amount_sats", &self.amount_sats)
            .field("fee_rate_sats_per_vb", &self.fee_rate_sats_per_vb)
            .field("change_address", &self.change_address)
            .field("utxos", &self.utxos.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl InputConfig {
    /// Reads and parses the request file. The raw text holds the key too, so
    /// it is wiped once parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = Zeroizing::new(fs::read_to_string(path).map_err(|source| {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?);
        serde_json::from_str(&content).map_err(|source| ConfigError::JsonParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Splits the file into a request and its inline outputs. The key string
    /// is wiped when `self` is dropped here.
    pub fn into_request(self) -> Result<(TransactionRequest, Option<Vec<UnspentOutput>>), EngineError> {
        let chain = Chain::resolve(&self.chain);
        let private_key = match (&self.private_key_hex, &self.private_key_wif) {
            (Some(key_hex), None) => SecretKeyBytes::from_hex(key_hex)?,
            (None, Some(wif)) => SecretKeyBytes::from_wif(wif, chain.params())?,
            (Some(_), Some(_)) => {
                return Err(EngineError::InvalidRequest(
                    "give either privateKeyHex or privateKeyWif, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(EngineError::InvalidRequest(
                    "missing privateKeyHex or privateKeyWif".to_string(),
                ));
            }
        };

        let request = TransactionRequest {
            chain,
            from_address: self.from_address,
            to_address: self.to_address,
            amount: self.amount_sats,
            fee_rate: self.fee_rate_sats_per_vb,
            private_key,
            change_address: self.change_address,
        };
        Ok((request, self.utxos))
    }
}
