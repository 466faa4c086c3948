//! Task storage - byte-level API for task queue persistence.
//!
//! Tasks are stored as serialized documents keyed by task ID. Every mutation
//! is a single write transaction, which gives the queue layer atomic
//! per-document upserts. Filtering by agent/account/status happens in the
//! typed wrapper in fleetflow-core.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

const TASK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");

/// Low-level task storage with byte-level API
#[derive(Clone)]
pub struct TaskStorage {
    db: Arc<Database>,
}

impl TaskStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(TASK_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store raw task data (insert or replace)
    pub fn put_task_raw(&self, id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TASK_TABLE)?;
            table.insert(id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get raw task data by ID
    pub fn get_task_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TASK_TABLE)?;

        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// List all raw task data
    pub fn list_tasks_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TASK_TABLE)?;

        let mut tasks = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            tasks.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(tasks)
    }

    /// Delete a task by ID, returning whether it existed
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(TASK_TABLE)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
