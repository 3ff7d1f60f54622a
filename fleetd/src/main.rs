//! Fleet live-state daemon
//!
//! Starts the sync engine's polling and broadcast loops, serves the push and
//! query routes, and shuts everything down on Ctrl+C.
//!
//! Usage:
//!   DEVICE_IDS=012345678901,012345678902 FLEET_USERNAME=ops FLEET_PASSWORD=... fleetd
//!   fleetd --device-ids 012345678901 --username ops --password ... --port 8080

use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_sync::{logging, FleetEngine, LoggingSink};
use push_server::PushServer;
use tracing::{info, warn};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_tracing(&config.log_level)?;

    info!("Starting fleetd");
    config.print_summary();

    let engine = Arc::new(
        FleetEngine::from_config(config.engine.clone(), Arc::new(LoggingSink))
            .context("Failed to create fleet engine")?,
    );
    let handle = engine.start().context("Failed to start fleet engine")?;

    let server = match PushServer::start(engine.clone(), config.listen).await {
        Ok(server) => server,
        Err(e) => {
            handle.shutdown().await;
            return Err(e).context("Failed to start push server");
        }
    };
    info!("Listening on {}", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");

    if let Err(e) = server.shutdown().await {
        warn!("Push server did not stop cleanly: {}", e);
    }
    handle.shutdown().await;

    info!("Final polling stats: {}", engine.polling_stats());
    Ok(())
}

/// Install the global subscriber
///
/// `FLEET_LOG_MODE` selects one of the shared logging modes; otherwise a plain
/// fmt subscriber filtered at `level` (or `RUST_LOG`) is used.
fn init_tracing(level: &str) -> Result<()> {
    if std::env::var_os(logging::LOG_MODE_ENV).is_some() {
        return logging::init_logging_from_env().context("Failed to initialize logging");
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}
