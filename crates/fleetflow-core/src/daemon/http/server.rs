//! HTTP server with graceful shutdown and background sweepers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use super::router::build_router;
use crate::AppCore;

const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9800,
        }
    }
}

impl HttpConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("FLEETFLOW_HOST").unwrap_or(defaults.host),
            port: std::env::var("FLEETFLOW_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }
}

pub struct HttpServer {
    core: Arc<AppCore>,
}

impl HttpServer {
    pub fn new(core: Arc<AppCore>) -> Self {
        Self { core }
    }

    /// Serve until the shutdown channel fires. The orphan sweeper runs
    /// alongside and stops with the server.
    pub async fn run(self, config: HttpConfig, shutdown: broadcast::Sender<()>) -> Result<()> {
        let sweeper = self
            .core
            .liveness
            .clone()
            .spawn_sweeper(ORPHAN_SWEEP_INTERVAL, shutdown.subscribe());

        let app = build_router(self.core);
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("FleetFlow daemon listening on {addr}");

        let mut rx = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await?;

        let _ = sweeper.await;
        info!("FleetFlow daemon stopped");
        Ok(())
    }
}
