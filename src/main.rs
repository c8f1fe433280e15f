//! Command-line entry point: runs discovery or a sync and writes messages to stdout.

use anyhow::Context;
use clap::Parser;
use darksky_tap::{Catalog, Config, DarkskyClient, Emitter, StateStore, Tap};
use log::{info, warn};
use std::path::PathBuf;

/// Extract Dark Sky forecasts as a stream of SCHEMA, RECORD and STATE messages.
#[derive(Parser)]
#[command(name = "tap-darksky", version)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, short, required_unless_present = "discover")]
    config: Option<PathBuf>,

    /// Path to a state file from a previous run. Updated in place as the sync progresses.
    #[arg(long, short)]
    state: Option<PathBuf>,

    /// Path to a catalog with stream and field selection.
    #[arg(long, visible_alias = "properties")]
    catalog: Option<PathBuf>,

    /// Print the catalog of available streams and exit.
    #[arg(long, short)]
    discover: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();

    let cli = Cli::parse();

    if cli.discover {
        info!("Starting discover");
        let catalog = Catalog::discover()?;
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        info!("Finished discover");
        return Ok(());
    }

    let config_path = cli.config.context("--config is required to sync")?;
    let config = Config::load(&config_path)?;
    config.log_config();

    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::discover()?.select_all(),
    };
    let state = match &cli.state {
        Some(path) => StateStore::load(path)?,
        None => StateStore::default(),
    };

    let client = DarkskyClient::builder()
        .secret_key(config.secret_key.clone())
        .maybe_user_agent(config.user_agent.clone())
        .build();
    if !client
        .verify_credentials()
        .await
        .context("Failed to verify the secret key")?
    {
        warn!("Credential check did not return a forecast, continuing");
    }

    let mut tap = Tap::builder()
        .client(client)
        .config(config)
        .catalog(catalog)
        .state(state)
        .emitter(Emitter::new(std::io::stdout()))
        .build();

    info!("Starting sync");
    let total = tap.sync().await?;
    info!("Finished sync, {} records emitted", total);
    Ok(())
}
