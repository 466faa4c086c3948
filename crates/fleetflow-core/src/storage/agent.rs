//! Typed agent storage.

use anyhow::Result;
use fleetflow_storage::AgentStorage;

use crate::models::Agent;

#[derive(Clone)]
pub struct AgentStore {
    raw: AgentStorage,
}

impl AgentStore {
    pub fn new(raw: AgentStorage) -> Self {
        Self { raw }
    }

    /// Insert or replace an agent record.
    pub fn upsert(&self, agent: &Agent) -> Result<()> {
        let data = serde_json::to_vec(agent)?;
        self.raw.put_agent_raw(&agent.id, &data)
    }

    pub fn get(&self, id: &str) -> Result<Option<Agent>> {
        match self.raw.get_agent_raw(id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub fn list_by_account(&self, account_id: &str) -> Result<Vec<Agent>> {
        let mut agents = Vec::new();
        for (_, data) in self.raw.list_agents_raw()? {
            let agent: Agent = serde_json::from_slice(&data)?;
            if agent.account_id == account_id {
                agents.push(agent);
            }
        }
        Ok(agents)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.raw.delete_agent(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetflow_storage::Storage as RawStorage;
    use tempfile::tempdir;

    fn create_test_store() -> (AgentStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let raw = RawStorage::new(db_path.to_str().unwrap()).unwrap();
        (AgentStore::new(raw.agents.clone()), temp_dir)
    }

    #[test]
    fn test_upsert_and_get() {
        let (store, _dir) = create_test_store();
        let agent = Agent::new("agent-1".into(), "acct-1".into(), "builder".into());

        store.upsert(&agent).unwrap();

        let loaded = store.get("agent-1").unwrap().unwrap();
        assert_eq!(loaded.name, "builder");
        assert_eq!(loaded.account_id, "acct-1");
    }

    #[test]
    fn test_list_by_account_filters() {
        let (store, _dir) = create_test_store();
        store
            .upsert(&Agent::new("a1".into(), "acct-1".into(), "one".into()))
            .unwrap();
        store
            .upsert(&Agent::new("a2".into(), "acct-2".into(), "two".into()))
            .unwrap();
        store
            .upsert(&Agent::new("a3".into(), "acct-1".into(), "three".into()))
            .unwrap();

        let agents = store.list_by_account("acct-1").unwrap();
        assert_eq!(agents.len(), 2);
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = create_test_store();
        store
            .upsert(&Agent::new("a1".into(), "acct-1".into(), "one".into()))
            .unwrap();

        assert!(store.delete("a1").unwrap());
        assert!(store.get("a1").unwrap().is_none());
        assert!(!store.delete("a1").unwrap());
    }
}
