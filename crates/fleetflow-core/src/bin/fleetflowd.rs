//! FleetFlow platform daemon.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetflow_core::daemon::http::{HttpConfig, HttpServer};
use fleetflow_core::{AppCore, CoreConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CoreConfig::from_env()?;
    let core = Arc::new(AppCore::new(&config)?);

    let (shutdown_tx, _) = broadcast::channel(1);
    let server = HttpServer::new(core);
    let http_config = HttpConfig::from_env();

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = ctrl_c_tx.send(());
        }
    });

    server.run(http_config, shutdown_tx).await
}
