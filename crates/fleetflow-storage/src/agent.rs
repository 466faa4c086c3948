//! Agent storage - byte-level API for agent record persistence.
//!
//! Agent records are stored as serialized documents keyed by agent ID.
//! Typed conversions live in the fleetflow-core wrapper layer.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

const AGENT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");

/// Low-level agent storage with byte-level API
#[derive(Clone)]
pub struct AgentStorage {
    db: Arc<Database>,
}

impl AgentStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(AGENT_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store raw agent data (insert or replace)
    pub fn put_agent_raw(&self, id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AGENT_TABLE)?;
            table.insert(id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get raw agent data by ID
    pub fn get_agent_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AGENT_TABLE)?;

        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// List all raw agent data
    pub fn list_agents_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AGENT_TABLE)?;

        let mut agents = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            agents.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(agents)
    }

    /// Delete an agent by ID, returning whether it existed
    pub fn delete_agent(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(AGENT_TABLE)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_storage() -> (AgentStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(Database::create(db_path).unwrap());
        (AgentStorage::new(db).unwrap(), temp_dir)
    }

    #[test]
    fn test_put_and_get_agent_raw() {
        let (storage, _dir) = create_test_storage();

        storage.put_agent_raw("agent-001", b"agent data").unwrap();

        let retrieved = storage.get_agent_raw("agent-001").unwrap();
        assert_eq!(retrieved.unwrap(), b"agent data");
    }

    #[test]
    fn test_get_nonexistent_agent() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.get_agent_raw("nope").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let (storage, _dir) = create_test_storage();

        storage.put_agent_raw("agent-001", b"original").unwrap();
        storage.put_agent_raw("agent-001", b"updated").unwrap();

        let retrieved = storage.get_agent_raw("agent-001").unwrap();
        assert_eq!(retrieved.unwrap(), b"updated");
    }

    #[test]
    fn test_list_agents_raw() {
        let (storage, _dir) = create_test_storage();

        storage.put_agent_raw("agent-001", b"a").unwrap();
        storage.put_agent_raw("agent-002", b"b").unwrap();

        let agents = storage.list_agents_raw().unwrap();
        assert_eq!(agents.len(), 2);
    }

    #[test]
    fn test_delete_agent() {
        let (storage, _dir) = create_test_storage();

        storage.put_agent_raw("agent-001", b"data").unwrap();

        assert!(storage.delete_agent("agent-001").unwrap());
        assert!(storage.get_agent_raw("agent-001").unwrap().is_none());
        assert!(!storage.delete_agent("agent-001").unwrap());
    }
}
