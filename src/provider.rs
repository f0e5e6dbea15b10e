//! UTXO provider and broadcaster.
//!
//! [`UtxoProvider`] is the seam the engine talks through; [`BlockchairClient`]
//! is the HTTP implementation. Neither retries: a failed call is returned to
//! the caller as is.

use std::future::Future;

use bitcoin::Txid;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::address::script_pubkey_for;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::network::Chain;
use crate::types::UnspentOutput;

/// Provider answer to a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BroadcastResponse {
    pub fn accepted(transaction_hash: impl Into<String>) -> Self {
        BroadcastResponse {
            success: true,
            transaction_hash: Some(transaction_hash.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        BroadcastResponse {
            success: false,
            transaction_hash: None,
            error: Some(error.into()),
        }
    }
}

pub trait UtxoProvider {
    /// Unspent outputs paying `address`. An unknown address yields an empty list.
    fn unspent_outputs(
        &self,
        chain: Chain,
        address: &str,
    ) -> impl Future<Output = Result<Vec<UnspentOutput>, ProviderError>> + Send;

    /// Submits a raw transaction. `Err` means the call itself failed; a
    /// rejection by the network is `Ok` with `success == false`.
    fn broadcast(
        &self,
        chain: Chain,
        raw_tx_hex: &str,
    ) -> impl Future<Output = Result<BroadcastResponse, ProviderError>> + Send;
}

/// Blockchair path segment for a chain.
pub fn chain_slug(chain: Chain) -> &'static str {
    match chain {
        Chain::Bitcoin => "bitcoin",
        Chain::Litecoin => "litecoin",
        Chain::Dogecoin => "dogecoin",
        Chain::BitcoinCash => "bitcoin-cash",
    }
}

#[derive(Debug, Clone)]
pub struct BlockchairClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct Context {
    #[serde(default)]
    state: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DashboardResponse {
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    context: Context,
}

#[derive(Debug, Deserialize)]
struct AddressDashboard {
    #[serde(default)]
    utxo: Vec<DashboardUtxo>,
}

#[derive(Debug, Deserialize)]
struct DashboardUtxo {
    block_id: i64,
    transaction_hash: Txid,
    index: u32,
    value: u64,
    #[serde(default)]
    script_hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    data: Option<PushData>,
    #[serde(default)]
    context: Context,
}

#[derive(Debug, Deserialize)]
struct PushData {
    #[serde(default)]
    transaction_hash: Option<String>,
}

impl BlockchairClient {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::new();
        Self { config, client }
    }

    fn url(&self, chain: Chain, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            chain_slug(chain),
            path
        )
    }

    fn key_query(&self) -> Vec<(&'static str, &str)> {
        self.config
            .api_key
            .as_deref()
            .map(|key| vec![("key", key)])
            .unwrap_or_default()
    }

    pub async fn fetch_unspent_outputs(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Vec<UnspentOutput>, ProviderError> {
        let url = self.url(chain, &format!("dashboards/address/{}", address));
        log::debug!("fetching UTXOs for {} on {}", address, chain);

        let resp = self
            .client
            .get(&url)
            .query(&self.key_query())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let dashboard: DashboardResponse = resp.json().await.map_err(transport)?;
        if let Some(error) = dashboard.context.error {
            return Err(ProviderError::Malformed(error));
        }
        let Some(entry) = dashboard.data.get(address).filter(|v| !v.is_null()) else {
            log::info!("{} not present in provider response, treating as unfunded", address);
            return Ok(Vec::new());
        };
        let entry: AddressDashboard = serde_json::from_value(entry.clone())
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let utxos = entry
            .utxo
            .into_iter()
            .map(|utxo| to_unspent_output(utxo, chain, address, dashboard.context.state))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("found {} UTXOs for {} on {}", utxos.len(), address, chain);
        Ok(utxos)
    }

    pub async fn push_transaction(
        &self,
        chain: Chain,
        raw_tx_hex: &str,
    ) -> Result<BroadcastResponse, ProviderError> {
        let url = self.url(chain, "push/transaction");
        log::info!("broadcasting {} bytes on {}", raw_tx_hex.len() / 2, chain);

        let resp = self
            .client
            .post(&url)
            .query(&self.key_query())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "data": raw_tx_hex }))
            .timeout(self.config.broadcast_timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        Ok(push_outcome(status, &body))
    }
}

fn push_outcome(status: StatusCode, body: &str) -> BroadcastResponse {
    let parsed = serde_json::from_str::<PushResponse>(body).ok();
    if let Some(error) = parsed.as_ref().and_then(|p| p.context.error.clone()) {
        log::warn!("broadcast rejected: {}", error);
        return BroadcastResponse::rejected(error);
    }
    if !status.is_success() {
        log::warn!("broadcast rejected with HTTP {}", status);
        return BroadcastResponse::rejected(format!("HTTP {}", status.as_u16()));
    }
    match parsed.and_then(|p| p.data).and_then(|d| d.transaction_hash) {
        Some(hash) => {
            log::info!("broadcast accepted: {}", hash);
            BroadcastResponse::accepted(hash)
        }
        None => BroadcastResponse::rejected("No transaction hash in response"),
    }
}

fn to_unspent_output(
    utxo: DashboardUtxo,
    chain: Chain,
    address: &str,
    tip: Option<i64>,
) -> Result<UnspentOutput, ProviderError> {
    // Outputs at one address all carry that address's locking script.
    let script_pubkey = match utxo.script_hex {
        Some(script_hex) => hex::decode(&script_hex)
            .map(bitcoin::ScriptBuf::from_bytes)
            .map_err(|e| ProviderError::Malformed(format!("script_hex: {}", e)))?,
        None => script_pubkey_for(address, chain.params())
            .map_err(|e| ProviderError::Malformed(e.to_string()))?,
    };
    // Mempool outputs are reported with a non-positive block id.
    let confirmations = match tip {
        Some(tip) if utxo.block_id > 0 => u32::try_from(tip - utxo.block_id + 1).ok(),
        Some(_) => Some(0),
        None => None,
    };
    Ok(UnspentOutput {
        txid: utxo.transaction_hash,
        vout: utxo.index,
        value: utxo.value,
        script_pubkey,
        confirmations,
    })
}

fn transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e)
    }
}

impl UtxoProvider for BlockchairClient {
    async fn unspent_outputs(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Vec<UnspentOutput>, ProviderError> {
        self.fetch_unspent_outputs(chain, address).await
    }

    async fn broadcast(
        &self,
        chain: Chain,
        raw_tx_hex: &str,
    ) -> Result<BroadcastResponse, ProviderError> {
        self.push_transaction(chain, raw_tx_hex).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_outcomes() {
        let ok = push_outcome(
            StatusCode::OK,
            r#"{"data":{"transaction_hash":"abcd"},"context":{"code":200}}"#,
        );
        assert_eq!(ok, BroadcastResponse::accepted("abcd"));

        let rejected = push_outcome(
            StatusCode::BAD_REQUEST,
            r#"{"data":null,"context":{"code":400,"error":"Invalid transaction"}}"#,
        );
        assert_eq!(rejected, BroadcastResponse::rejected("Invalid transaction"));

        let html = push_outcome(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(html, BroadcastResponse::rejected("HTTP 502"));

        let no_hash = push_outcome(StatusCode::OK, r#"{"data":{},"context":{}}"#);
        assert!(!no_hash.success);
    }

    #[test]
    fn confirmations_from_chain_tip() {
        let utxo = |block_id| DashboardUtxo {
            block_id,
            transaction_hash: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
                .parse()
                .unwrap(),
            index: 0,
            value: 1000,
            script_hex: Some("76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac".to_string()),
        };
        let addr = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        let mined = to_unspent_output(utxo(100), Chain::Bitcoin, addr, Some(105)).unwrap();
        assert_eq!(mined.confirmations, Some(6));
        let pending = to_unspent_output(utxo(-1), Chain::Bitcoin, addr, Some(105)).unwrap();
        assert_eq!(pending.confirmations, Some(0));
        let unknown = to_unspent_output(utxo(100), Chain::Bitcoin, addr, None).unwrap();
        assert_eq!(unknown.confirmations, None);
    }

    #[test]
    fn missing_script_uses_address_script() {
        let addr = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        let utxo = DashboardUtxo {
            block_id: 1,
            transaction_hash: Txid::from_raw_hash(bitcoin::hashes::Hash::all_zeros()),
            index: 3,
            value: 5000,
            script_hex: None,
        };
        let out = to_unspent_output(utxo, Chain::Bitcoin, addr, None).unwrap();
        assert_eq!(out.script_pubkey, script_pubkey_for(addr, Chain::Bitcoin.params()).unwrap());
        assert_eq!(out.vout, 3);
    }

    #[test]
    fn slugs() {
        assert_eq!(chain_slug(Chain::BitcoinCash), "bitcoin-cash");
        assert_eq!(chain_slug(Chain::Dogecoin), "dogecoin");
    }
}
