//! Per-chain consensus parameters.
//!
//! Lookup is a static table keyed by [`Chain`]. Unrecognised identifiers
//! resolve to Bitcoin mainnet; callers that must reject them use
//! [`Chain::from_str`] instead of [`params_for`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Litecoin,
    Dogecoin,
    #[serde(rename = "bitcoincash")]
    BitcoinCash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip32Versions {
    pub public: u32,
    pub private: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub chain: Chain,
    pub symbol: &'static str,
    pub message_prefix: &'static str,
    pub bip32: Bip32Versions,
    pub pubkey_hash: u8,
    pub script_hash: u8,
    pub wif: u8,
    /// Human-readable part of witness addresses; `None` on chains without SegWit.
    pub bech32_hrp: Option<&'static str>,
    pub cashaddr_prefix: Option<&'static str>,
    /// Replay-protection fork id mixed into the sighash type (`SIGHASH_FORKID`).
    pub fork_id: Option<u32>,
    pub segwit: bool,
}

static BITCOIN: NetworkParams = NetworkParams {
    chain: Chain::Bitcoin,
    symbol: "BTC",
    message_prefix: "\x18Bitcoin Signed Message:\n",
    bip32: Bip32Versions {
        public: 0x0488_b21e,
        private: 0x0488_ade4,
    },
    pubkey_hash: 0x00,
    script_hash: 0x05,
    wif: 0x80,
    bech32_hrp: Some("bc"),
    cashaddr_prefix: None,
    fork_id: None,
    segwit: true,
};

static LITECOIN: NetworkParams = NetworkParams {
    chain: Chain::Litecoin,
    symbol: "LTC",
    message_prefix: "\x19Litecoin Signed Message:\n",
    bip32: Bip32Versions {
        public: 0x019d_a462,
        private: 0x019d_9cfe,
    },
    pubkey_hash: 0x30,
    script_hash: 0x32,
    wif: 0xb0,
    bech32_hrp: Some("ltc"),
    cashaddr_prefix: None,
    fork_id: None,
    segwit: true,
};

static DOGECOIN: NetworkParams = NetworkParams {
    chain: Chain::Dogecoin,
    symbol: "DOGE",
    message_prefix: "\x19Dogecoin Signed Message:\n",
    bip32: Bip32Versions {
        public: 0x02fa_cafd,
        private: 0x02fa_c398,
    },
    pubkey_hash: 0x1e,
    script_hash: 0x16,
    wif: 0x9e,
    bech32_hrp: None,
    cashaddr_prefix: None,
    fork_id: None,
    segwit: false,
};

// Legacy Base58 prefixes are shared with Bitcoin.
static BITCOIN_CASH: NetworkParams = NetworkParams {
    chain: Chain::BitcoinCash,
    symbol: "BCH",
    message_prefix: "\x18Bitcoin Signed Message:\n",
    bip32: Bip32Versions {
        public: 0x0488_b21e,
        private: 0x0488_ade4,
    },
    pubkey_hash: 0x00,
    script_hash: 0x05,
    wif: 0x80,
    bech32_hrp: None,
    cashaddr_prefix: Some("bitcoincash"),
    fork_id: Some(0),
    segwit: false,
};

impl Chain {
    pub const ALL: [Chain; 4] = [
        Chain::Bitcoin,
        Chain::Litecoin,
        Chain::Dogecoin,
        Chain::BitcoinCash,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Litecoin => "litecoin",
            Chain::Dogecoin => "dogecoin",
            Chain::BitcoinCash => "bitcoincash",
        }
    }

    pub fn params(&self) -> &'static NetworkParams {
        match self {
            Chain::Bitcoin => &BITCOIN,
            Chain::Litecoin => &LITECOIN,
            Chain::Dogecoin => &DOGECOIN,
            Chain::BitcoinCash => &BITCOIN_CASH,
        }
    }

    pub fn is_segwit(&self) -> bool {
        self.params().segwit
    }

    /// Lenient lookup: anything unrecognised becomes [`Chain::Bitcoin`].
    pub fn resolve(identifier: &str) -> Chain {
        identifier.parse().unwrap_or_else(|_| {
            log::warn!(
                "unknown chain identifier {:?}, falling back to bitcoin parameters",
                identifier
            );
            Chain::Bitcoin
        })
    }
}

impl FromStr for Chain {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitcoin" => Ok(Chain::Bitcoin),
            "litecoin" => Ok(Chain::Litecoin),
            "dogecoin" => Ok(Chain::Dogecoin),
            "bitcoincash" => Ok(Chain::BitcoinCash),
            other => Err(EngineError::UnknownChain(other.to_string())),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

pub fn params_for(chain: &str) -> &'static NetworkParams {
    Chain::resolve(chain).params()
}

pub fn is_segwit_chain(chain: &str) -> bool {
    params_for(chain).segwit
}
