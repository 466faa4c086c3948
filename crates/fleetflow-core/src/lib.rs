//! FleetFlow Core - dispatch, liveness and relay services.
//!
//! The platform half of the system: task queue and state machine, heartbeat
//! tracking, credential handling, signed agent tokens, session registry and
//! the HTTP daemon the agents talk to. The agent-side binary lives in
//! fleetflow-agent.

pub mod auth;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod models;
pub mod notify;
pub mod services;
pub mod sessions;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;
use fleetflow_storage::CredentialVault;

pub use config::CoreConfig;
pub use error::CoreError;

use auth::TokenService;
use notify::{LogNotifier, NotificationSender};
use services::{LivenessTracker, ProgressRelay, TaskQueue};
use storage::Storage;

/// Shared application core handed to every HTTP handler.
pub struct AppCore {
    pub storage: Arc<Storage>,
    pub tokens: TokenService,
    pub queue: Arc<TaskQueue>,
    pub liveness: Arc<LivenessTracker>,
    pub relay: ProgressRelay,
    pub notifier: Arc<dyn NotificationSender>,
    pub account_key: Option<String>,
}

impl AppCore {
    pub fn new(config: &CoreConfig) -> Result<Self> {
        Self::with_notifier(config, Arc::new(LogNotifier))
    }

    /// Construct the core with an injected notification fan-out.
    pub fn with_notifier(
        config: &CoreConfig,
        notifier: Arc<dyn NotificationSender>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::new(&config.db_path)?);
        let vault = Arc::new(CredentialVault::new(&config.vault_keys)?);
        let tokens = TokenService::new(&config.token_secret);
        let queue = Arc::new(TaskQueue::new(storage.clone(), vault));
        let liveness = Arc::new(LivenessTracker::new(storage.clone(), queue.clone()));
        let relay = ProgressRelay::new(queue.clone(), notifier.clone());

        Ok(Self {
            storage,
            tokens,
            queue,
            liveness,
            relay,
            notifier,
            account_key: config.account_key.clone(),
        })
    }
}
