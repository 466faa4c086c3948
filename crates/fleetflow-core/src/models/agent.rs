//! Agent records: one per remote worker process.
//!
//! `status` is the *explicit* lifecycle state. The displayed liveness
//! (online/stale/offline) is always derived from `last_heartbeat_at` by
//! `services::liveness::classify`; it is never stored.

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Online,
    /// Set by the task queue while the agent has an in_progress task.
    Busy,
    /// Explicitly retired by its owner. Sticky: heartbeats must not
    /// resurrect a disconnected agent.
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
    /// Unix millis of the last accepted heartbeat.
    pub last_heartbeat_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Agent {
    pub fn new(id: String, account_id: String, name: String) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id,
            account_id,
            name,
            platform: None,
            working_dir: None,
            capabilities: Vec::new(),
            status: AgentStatus::Online,
            last_heartbeat_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.status == AgentStatus::Disconnected
    }
}
