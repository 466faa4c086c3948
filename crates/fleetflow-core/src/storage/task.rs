//! Typed task storage.
//!
//! Poll ordering contract: `list_pending_for_agent` returns oldest first so
//! an agent drains its queue in dispatch order.

use anyhow::Result;
use fleetflow_storage::TaskStorage;

use crate::models::{Task, TaskStatus};

#[derive(Clone)]
pub struct TaskStore {
    raw: TaskStorage,
}

impl TaskStore {
    pub fn new(raw: TaskStorage) -> Self {
        Self { raw }
    }

    /// Insert or replace a task document. One write transaction, so
    /// concurrent readers see either the old or the new document.
    pub fn put(&self, task: &Task) -> Result<()> {
        let data = serde_json::to_vec(task)?;
        self.raw.put_task_raw(&task.id, &data)
    }

    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        match self.raw.get_task_raw(id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub fn list_by_account(&self, account_id: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .list_all()?
            .into_iter()
            .filter(|t| t.account_id == account_id)
            .collect();
        tasks.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(tasks)
    }

    /// Pending tasks for one agent, oldest first.
    pub fn list_pending_for_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .list_all()?
            .into_iter()
            .filter(|t| t.agent_id == agent_id && t.status == TaskStatus::Pending)
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Non-terminal tasks for one agent (pending + in_progress).
    pub fn list_active_for_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| t.agent_id == agent_id && !t.status.is_terminal())
            .collect())
    }

    pub fn list_in_progress(&self) -> Result<Vec<Task>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect())
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.raw.delete_task(id)
    }

    fn list_all(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for (_, data) in self.raw.list_tasks_raw()? {
            tasks.push(serde_json::from_slice(&data)?);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetflow_storage::Storage as RawStorage;
    use tempfile::tempdir;

    fn create_test_store() -> (TaskStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let raw = RawStorage::new(db_path.to_str().unwrap()).unwrap();
        (TaskStore::new(raw.tasks.clone()), temp_dir)
    }

    fn make_task(agent_id: &str, created_at: i64) -> Task {
        let mut task = Task::new("acct-1".into(), agent_id.into(), "build".into());
        task.created_at = created_at;
        task
    }

    #[test]
    fn test_put_and_get() {
        let (store, _dir) = create_test_store();
        let task = make_task("agent-1", 1000);

        store.put(&task).unwrap();

        let loaded = store.get(&task.id).unwrap().unwrap();
        assert_eq!(loaded.intent, "build");
        assert_eq!(loaded.status, TaskStatus::Pending);
    }

    #[test]
    fn test_pending_for_agent_oldest_first() {
        let (store, _dir) = create_test_store();
        let newer = make_task("agent-1", 2000);
        let older = make_task("agent-1", 1000);
        let other_agent = make_task("agent-2", 500);
        store.put(&newer).unwrap();
        store.put(&older).unwrap();
        store.put(&other_agent).unwrap();

        let pending = store.list_pending_for_agent("agent-1").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, older.id);
        assert_eq!(pending[1].id, newer.id);
    }

    #[test]
    fn test_pending_excludes_started_tasks() {
        let (store, _dir) = create_test_store();
        let mut started = make_task("agent-1", 1000);
        started.status = TaskStatus::InProgress;
        store.put(&started).unwrap();
        store.put(&make_task("agent-1", 2000)).unwrap();

        let pending = store.list_pending_for_agent("agent-1").unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_list_in_progress() {
        let (store, _dir) = create_test_store();
        let mut running = make_task("agent-1", 1000);
        running.status = TaskStatus::InProgress;
        let mut done = make_task("agent-2", 1000);
        done.status = TaskStatus::Completed;
        store.put(&running).unwrap();
        store.put(&done).unwrap();
        store.put(&make_task("agent-3", 1000)).unwrap();

        let in_progress = store.list_in_progress().unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, running.id);
    }

    #[test]
    fn test_list_by_account_newest_first() {
        let (store, _dir) = create_test_store();
        let older = make_task("agent-1", 1000);
        let newer = make_task("agent-1", 2000);
        store.put(&older).unwrap();
        store.put(&newer).unwrap();

        let tasks = store.list_by_account("acct-1").unwrap();
        assert_eq!(tasks[0].id, newer.id);
        assert_eq!(tasks[1].id, older.id);
    }
}
