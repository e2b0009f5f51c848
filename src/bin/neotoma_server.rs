//! Neotoma MCP Server
//!
//! Serves the Neotoma action surface as MCP over stdin/stdout. Logs go to
//! stderr so they never interleave with protocol traffic.

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use neotoma::config::{CliArgs, ServerConfig, ENV_LOG, USAGE};
use neotoma::engine::TruthEngine;
use neotoma::mcp::{serve_stdio, ActionHandler};
use neotoma::storage::TruthStores;

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn load_config() -> ServerConfig {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprint!("{USAGE}");
            std::process::exit(2);
        }
    };
    match ServerConfig::load_from_env(&args) {
        Ok(Some(config)) => config,
        Ok(None) => {
            print!("{USAGE}");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    init_tracing(&config);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Neotoma server starting");

    let stores = match &config.data_dir {
        Some(dir) => {
            tracing::info!(data_dir = %dir.display(), "opening data directory");
            // Holds an exclusive lock on the directory for the process lifetime.
            TruthStores::open_persistent(dir, &config.persistent_config())?
        }
        None => {
            tracing::warn!("no data directory configured; data will not survive a restart");
            TruthStores::in_memory()
        }
    };

    let engine = Arc::new(TruthEngine::new(stores, config.engine_config())?);
    let stats = engine.stats()?;
    tracing::info!(
        entities = stats.entities,
        snapshots = stats.snapshots,
        "engine ready"
    );

    let handler = ActionHandler::new(Arc::clone(&engine));

    tokio::select! {
        result = serve_stdio(handler) => result?,
        _ = signal::ctrl_c() => tracing::info!("interrupt received"),
    }

    let engine = Arc::clone(&engine);
    if let Err(e) = tokio::task::spawn_blocking(move || engine.sync_index()).await? {
        tracing::warn!(error = %e, "index did not drain before shutdown");
    }
    tracing::info!("Shut down");
    Ok(())
}
