#![forbid(unsafe_code)]

use std::fs;

use bazaar_storage::FileKeyValueStore;
use bazaar_tools::client::ApiClient;
use bazaar_tools::commands::execute;
use bazaar_tools::offline::OfflineReconciliationCounter;
use bazaar_tools::Cli;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    if let Some(parent) = cli.state_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("could not create {}: {e}", parent.display()))?;
    }
    let store = FileKeyValueStore::open(&cli.state_path).map_err(|e| e.to_string())?;
    let mut counter = OfflineReconciliationCounter::load(store).map_err(|e| e.to_string())?;
    let client = ApiClient::new(&cli.client_config()).map_err(|e| e.to_string())?;
    let output = execute(cli.command, &client, &mut counter).map_err(|e| e.to_string())?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
