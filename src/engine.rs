//! The send pipeline:
//! fetch -> select -> assemble -> sign -> validate -> serialize -> broadcast.
//!
//! Nothing reaches the provider's broadcast endpoint until serialization has
//! succeeded, and every exit path drops (and wipes) the request's key.

use bitcoin::ScriptBuf;
use bitcoin::secp256k1::{All, Secp256k1};
use serde::Serialize;

use crate::address::script_pubkey_for;
use crate::error::{EngineError, ProviderError};
use crate::network::{Chain, NetworkParams};
use crate::provider::UtxoProvider;
use crate::secret::SecretKeyBytes;
use crate::selector::{SelectionRequest, SelectionResult, SelectionStrategy, Selector};
use crate::transaction::{SerializedTransaction, TransactionBuilder};
use crate::types::{TransactionRequest, TransactionResult, UnspentOutput};

/// Outcome of a successful [`Engine::try_send`].
#[derive(Debug, Clone)]
pub struct SentTransaction {
    /// Id reported by the provider, or the local txid when it reported none.
    pub transaction_id: String,
    pub transaction: SerializedTransaction,
}

/// Dry-run numbers for a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    pub fee: u64,
    /// Amount plus fee.
    pub total_needed: u64,
    pub inputs: usize,
    pub change: u64,
}

impl From<&SelectionResult> for FeeEstimate {
    fn from(selection: &SelectionResult) -> Self {
        FeeEstimate {
            fee: selection.fee,
            total_needed: selection.target.saturating_add(selection.fee),
            inputs: selection.inputs.len(),
            change: selection.change,
        }
    }
}

pub struct Engine<P> {
    provider: P,
    selector: Selector,
    secp: Secp256k1<All>,
}

impl<P: UtxoProvider> Engine<P> {
    pub fn new(provider: P) -> Self {
        Self::with_strategy(provider, SelectionStrategy::default())
    }

    pub fn with_strategy(provider: P, strategy: SelectionStrategy) -> Self {
        Engine {
            provider,
            selector: Selector::new(strategy),
            secp: Secp256k1::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs the full pipeline. Failures come back as `success: false`
    /// results naming the stage, never as errors.
    pub async fn send(&self, request: TransactionRequest) -> TransactionResult {
        let chain = request.chain;
        match self.try_send(request).await {
            Ok(sent) => TransactionResult::succeeded(
                sent.transaction_id,
                sent.transaction.hex(),
                sent.transaction.fee,
            ),
            Err(e) => {
                log::error!("{} send failed at {} stage: {}", chain, e.stage(), e);
                TransactionResult::failed(&e)
            }
        }
    }

    pub async fn try_send(&self, request: TransactionRequest) -> Result<SentTransaction, EngineError> {
        let prepared = Prepared::new(request)?;
        let chain = prepared.chain;

        log::info!(
            "sending {} sats on {} from {} to {}",
            prepared.amount,
            chain,
            prepared.from_address,
            prepared.to_address
        );
        let utxos = self
            .provider
            .unspent_outputs(chain, &prepared.from_address)
            .await
            .map_err(EngineError::UtxoFetch)?;

        let transaction = self.build_prepared(prepared, &utxos)?;
        let transaction_id = self.broadcast(chain, &transaction).await?;
        Ok(SentTransaction {
            transaction_id,
            transaction,
        })
    }

    /// Select, assemble, sign, validate and serialize over `utxos` without
    /// touching the provider.
    pub fn build(
        &self,
        request: TransactionRequest,
        utxos: &[UnspentOutput],
    ) -> Result<SerializedTransaction, EngineError> {
        self.build_prepared(Prepared::new(request)?, utxos)
    }

    /// Fetches and selects without signing or broadcasting.
    pub async fn estimate_fee(
        &self,
        chain: Chain,
        from_address: &str,
        amount: u64,
        fee_rate: u64,
    ) -> Result<FeeEstimate, EngineError> {
        let request = SelectionRequest::new(amount, fee_rate, chain.is_segwit())?;
        // The address becomes part of the provider URL.
        script_pubkey_for(from_address, chain.params())?;
        let utxos = self
            .provider
            .unspent_outputs(chain, from_address)
            .await
            .map_err(EngineError::UtxoFetch)?;
        let selection = self.select(&utxos, &request)?;
        Ok(FeeEstimate::from(&selection))
    }

    fn select(
        &self,
        utxos: &[UnspentOutput],
        request: &SelectionRequest,
    ) -> Result<SelectionResult, EngineError> {
        if utxos.is_empty() {
            return Err(EngineError::NoUtxos);
        }
        let usable = self
            .selector
            .filter_dust(utxos, request.fee_rate, request.segwit);
        if usable.is_empty() {
            return Err(EngineError::NoUsableUtxos);
        }
        let selection = self.selector.select(&usable, request)?;
        log::info!(
            "selected {} of {} inputs: total={} fee={} change={}",
            selection.inputs.len(),
            usable.len(),
            selection.total_input,
            selection.fee,
            selection.change
        );
        Ok(selection)
    }

    fn build_prepared(
        &self,
        prepared: Prepared,
        utxos: &[UnspentOutput],
    ) -> Result<SerializedTransaction, EngineError> {
        let Prepared {
            params,
            amount,
            fee_rate,
            recipient,
            change,
            private_key,
            ..
        } = prepared;

        let request = SelectionRequest::new(amount, fee_rate, params.segwit)?;
        let selection = self.select(utxos, &request)?;

        TransactionBuilder::new(params)
            .assemble(&selection, recipient, change)?
            .sign(private_key, &self.secp)?
            .validate(&self.secp)?
            .serialize()
    }

    async fn broadcast(
        &self,
        chain: Chain,
        transaction: &SerializedTransaction,
    ) -> Result<String, EngineError> {
        let raw_tx_hex = transaction.hex();
        let local_txid = transaction.txid.to_string();

        let outcome = self.provider.broadcast(chain, &raw_tx_hex).await;
        match outcome {
            Ok(response) if response.success => {
                let txid = response.transaction_hash.unwrap_or_else(|| local_txid.clone());
                if txid != local_txid {
                    log::warn!("provider reported txid {}, computed {}", txid, local_txid);
                }
                log::info!("broadcast accepted: {}", txid);
                Ok(txid)
            }
            Ok(response) => Err(EngineError::BroadcastFailed(
                response
                    .error
                    .unwrap_or_else(|| "rejected without reason".to_string()),
            )),
            Err(ProviderError::Timeout) => {
                log::warn!("broadcast of {} timed out; outcome unknown", local_txid);
                Err(EngineError::BroadcastOutcomeUnknown {
                    txid: local_txid,
                    raw_tx_hex,
                    reason: ProviderError::Timeout.to_string(),
                })
            }
            Err(e) => Err(EngineError::BroadcastFailed(e.to_string())),
        }
    }
}

/// A request with its addresses decoded. Holds the key until signing.
struct Prepared {
    chain: Chain,
    params: &'static NetworkParams,
    from_address: String,
    to_address: String,
    amount: u64,
    fee_rate: u64,
    recipient: ScriptBuf,
    change: ScriptBuf,
    private_key: SecretKeyBytes,
}

impl Prepared {
    fn new(request: TransactionRequest) -> Result<Self, EngineError> {
        request.check()?;
        let params = request.chain.params();
        let recipient = script_pubkey_for(&request.to_address, params)?;
        let change = script_pubkey_for(request.change_address(), params)?;
        script_pubkey_for(&request.from_address, params)?;

        let TransactionRequest {
            chain,
            from_address,
            to_address,
            amount,
            fee_rate,
            private_key,
            ..
        } = request;
        Ok(Prepared {
            chain,
            params,
            from_address,
            to_address,
            amount,
            fee_rate,
            recipient,
            change,
            private_key,
        })
    }
}
