//! FleetFlow Storage - Low-level persistence layer
//!
//! This crate provides the persistence layer for FleetFlow, using redb as
//! the embedded document store. It exposes byte-level APIs to avoid circular
//! dependencies with the core crate's models; typed wrappers are provided by
//! fleetflow-core.
//!
//! Every mutation runs inside a single write transaction, which is the
//! atomic per-document upsert the dispatch protocol relies on.
//!
//! # Tables
//!
//! - `agents` - Agent records keyed by agent ID
//! - `tasks` - Task documents keyed by task ID

pub mod agent;
pub mod task;
pub mod vault;

use anyhow::Result;
use redb::Database;
use std::sync::Arc;

pub use agent::AgentStorage;
pub use task::TaskStorage;
pub use vault::{CredentialVault, VaultError, KEY_SIZE};

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    db: Arc<Database>,
    pub agents: AgentStorage,
    pub tasks: TaskStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and initialize
    /// all required tables.
    pub fn new(path: &str) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let agents = AgentStorage::new(db.clone())?;
        let tasks = TaskStorage::new(db.clone())?;

        Ok(Self { db, agents, tasks })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
