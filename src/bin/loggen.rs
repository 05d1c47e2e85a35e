//! loggen - synthetic UDP load for loggate
//!
//! ```bash
//! loggen --config configs/loggen.yaml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use loggate::config::LoggingConfig;
use loggate::init::init_logging;
use loggate::loadgen::{run_worker, LoadgenConfig};
use loggate::shutdown::wait_for_shutdown;

/// Sends randomly generated log records to a running gateway.
#[derive(Parser, Debug)]
#[command(name = "loggen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the generator YAML configuration
    #[arg(short, long, default_value = "configs/loggen.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        ..Default::default()
    })?;

    let config = Arc::new(
        LoadgenConfig::load(&cli.config).with_context(|| format!("load config {}", cli.config.display()))?,
    );
    info!(target_addr = %config.target, workers = config.load.workers, rps = config.load.rps, "starting log generator");

    let shutdown = CancellationToken::new();
    let mut workers = JoinSet::new();
    for id in 1..=config.load.workers {
        workers.spawn(run_worker(id, Arc::clone(&config), shutdown.clone()));
    }

    wait_for_shutdown().await;
    info!("shutting down log generator");
    shutdown.cancel();

    while let Some(result) = workers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "load worker failed"),
            Err(e) => error!(error = %e, "load worker panicked"),
        }
    }

    info!("log generator stopped");
    Ok(())
}
