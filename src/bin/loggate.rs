//! loggate - UDP log gateway
//!
//! ```bash
//! loggate --config configs/loggate.yaml
//! LOGGATE_CONFIG=configs/loggate.yaml loggate --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use loggate::backend::SinkRegistry;
use loggate::config::Config;
use loggate::env::LOGGATE_CONFIG_ENV;
use loggate::init::init_logging;
use loggate::listener::UdpListener;
use loggate::shutdown::wait_for_shutdown;
use loggate::{LogService, Router, ServiceSettings};

/// Receives structured logs over UDP and ships them to batched storages.
#[derive(Parser, Debug)]
#[command(name = "loggate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = LOGGATE_CONFIG_ENV)]
    config: PathBuf,

    /// Log filter directive, overrides `logging.level` (e.g. "debug")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging)?;
    config.validate()?;

    let sinks = SinkRegistry::with_builtins()
        .build_enabled(config.enabled_storages())
        .context("build storage backends")?;
    let router = Router::new(&config.routing_rules, &config.default_destinations);
    let shutdown = CancellationToken::new();

    let mut service = LogService::new(sinks, router, ServiceSettings::from(&config.performance), shutdown.clone());
    service.start()?;
    let service = Arc::new(service);

    let listener = match UdpListener::bind(&config.server.log_address, service.clone()).await {
        Ok(listener) => listener,
        Err(e) => {
            service.shutdown().await;
            return Err(e).with_context(|| format!("bind udp listener on {}", config.server.log_address));
        }
    };
    let listener_counters = listener.counters();
    let listener_task = tokio::spawn(listener.run(shutdown.clone()));

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping gateway");
    shutdown.cancel();

    if let Err(e) = listener_task.await {
        error!(error = %e, "udp listener task failed");
    }

    let stats = service.shutdown().await;
    let received = listener_counters.snapshot();
    info!(
        received = received.received,
        malformed = received.malformed,
        receive_errors = received.receive_errors,
        "udp listener totals"
    );
    match serde_json::to_string(&stats) {
        Ok(summary) => info!(stats = %summary, "gateway stopped"),
        Err(_) => info!("gateway stopped"),
    }
    Ok(())
}
