//! Typed storage layer over the byte-level fleetflow-storage APIs.
//!
//! Models are persisted as JSON documents. Each wrapper owns its byte store
//! and handles the serde round trip; services never see raw bytes.

pub mod agent;
pub mod task;

use anyhow::Result;

pub use agent::AgentStore;
pub use task::TaskStore;

/// Typed storage manager, one instance per process.
pub struct Storage {
    pub agents: AgentStore,
    pub tasks: TaskStore,
}

impl Storage {
    pub fn new(path: &str) -> Result<Self> {
        let raw = fleetflow_storage::Storage::new(path)?;
        Ok(Self {
            agents: AgentStore::new(raw.agents.clone()),
            tasks: TaskStore::new(raw.tasks.clone()),
        })
    }
}
