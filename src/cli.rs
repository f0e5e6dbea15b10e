use std::fs;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{InputConfig, ProviderConfig};
use crate::engine::Engine;
use crate::error::{ConfigError, EngineError};
use crate::provider::BlockchairClient;
use crate::selector::SelectionStrategy;
use crate::types::TransactionResult;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the JSON request file
    #[clap(short, long, value_parser)]
    pub input_file: PathBuf,

    /// Where to save the raw transaction hex
    #[clap(short, long, value_parser)]
    pub output_file: Option<PathBuf>,

    /// Sign the file's inline UTXOs without contacting the provider
    #[clap(long)]
    pub offline: bool,

    /// Coin selection strategy
    #[clap(short, long, value_enum, default_value_t = SelectionStrategy::LargestFirst)]
    pub strategy: SelectionStrategy,
}

/// Runs one request. Only file problems are errors; pipeline failures are
/// reported inside the returned result.
pub async fn run(args: &CliArgs) -> Result<TransactionResult, ConfigError> {
    let input = InputConfig::from_file(&args.input_file)?;
    log::debug!("parsed input file: {:?}", input);

    let engine = Engine::with_strategy(
        BlockchairClient::new(ProviderConfig::from_env()),
        args.strategy,
    );
    let result = match input.into_request() {
        Err(e) => TransactionResult::failed(&e),
        Ok((request, utxos)) if args.offline => match utxos {
            Some(utxos) => match engine.build(request, &utxos) {
                Ok(tx) => TransactionResult::succeeded(tx.txid.to_string(), tx.hex(), tx.fee),
                Err(e) => TransactionResult::failed(&e),
            },
            None => TransactionResult::failed(&EngineError::InvalidRequest(
                "--offline needs inline utxos in the input file".to_string(),
            )),
        },
        Ok((request, utxos)) => {
            if utxos.is_some() {
                log::warn!("ignoring inline utxos; fetching from the provider");
            }
            engine.send(request).await
        }
    };

    if let (Some(path), Some(raw)) = (&args.output_file, &result.raw_transaction) {
        fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        log::info!("raw transaction saved to {:?}", path);
    }
    Ok(result)
}
