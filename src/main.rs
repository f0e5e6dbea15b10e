use std::process::ExitCode;

use clap::Parser;
use utxo_tx_engine::cli::{self, CliArgs};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = CliArgs::parse();
    log::info!("starting with arguments: {:?}", args);

    let result = match cli::run(&args).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("error: could not encode result: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if result.success {
        log::info!("done");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
