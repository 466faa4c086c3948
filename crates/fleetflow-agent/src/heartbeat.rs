//! Heartbeat loop.
//!
//! Runs on its own tokio task, independent of task execution: a long engine
//! run must never starve the beats that keep this agent classified online.
//! Failures are logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::client::ApiClient;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn spawn_heartbeat(
    client: Arc<ApiClient>,
    working_dir: Option<String>,
    capabilities: Vec<String>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match client.heartbeat(working_dir.as_deref(), Some(&capabilities)).await {
                        Ok(()) => debug!("Heartbeat sent"),
                        Err(e) => warn!("Heartbeat failed: {e:#}"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}
