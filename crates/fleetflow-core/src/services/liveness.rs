//! Heartbeat tracking and orphaned-task reconciliation.
//!
//! Liveness is derived, never stored: every display path calls the single
//! `classify` function against `last_heartbeat_at`. The explicit
//! `Disconnected` status always wins over heartbeat age.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::models::{Agent, AgentStatus, Task, TaskStatus};
use crate::services::queue::TaskQueue;
use crate::storage::Storage;

/// Heartbeats younger than this are `online`.
pub const ONLINE_THRESHOLD_MS: i64 = 45_000;

/// Heartbeats older than this are `offline`; in between is `stale`.
pub const OFFLINE_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// Error text persisted onto tasks auto-failed by orphan reconciliation.
pub const ORPHANED_TASK_ERROR: &str = "Agent went offline unexpectedly";

/// Derived liveness, three tiers plus the sticky explicit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Stale,
    Offline,
    Disconnected,
}

/// The one classifier every display and reconciliation path uses.
pub fn classify(status: AgentStatus, last_heartbeat_at: i64, now: i64) -> Liveness {
    if status == AgentStatus::Disconnected {
        return Liveness::Disconnected;
    }
    let age = now - last_heartbeat_at;
    if age < ONLINE_THRESHOLD_MS {
        Liveness::Online
    } else if age < OFFLINE_THRESHOLD_MS {
        Liveness::Stale
    } else {
        Liveness::Offline
    }
}

#[derive(Debug)]
pub struct HeartbeatOutcome {
    pub agent: Agent,
    /// True exactly on the offline-to-online transition, so the caller can
    /// emit a one-shot "agent came online" notification.
    pub came_online: bool,
}

pub struct LivenessTracker {
    storage: Arc<Storage>,
    queue: Arc<TaskQueue>,
}

impl LivenessTracker {
    pub fn new(storage: Arc<Storage>, queue: Arc<TaskQueue>) -> Self {
        Self { storage, queue }
    }

    /// Record a heartbeat. Refuses to resurrect a disconnected agent: the
    /// record is returned unchanged and no timestamps move.
    pub fn record_heartbeat(
        &self,
        agent_id: &str,
        working_dir: Option<String>,
        capabilities: Option<Vec<String>>,
    ) -> Result<HeartbeatOutcome, CoreError> {
        let mut agent = self
            .storage
            .agents
            .get(agent_id)?
            .ok_or(CoreError::NotFound("Agent"))?;

        if agent.is_disconnected() {
            warn!(agent_id, "Heartbeat from disconnected agent ignored");
            return Ok(HeartbeatOutcome {
                agent,
                came_online: false,
            });
        }

        let now = Utc::now().timestamp_millis();
        let before = classify(agent.status, agent.last_heartbeat_at, now);

        // Busy/Online are owned by the task queue; a heartbeat only
        // refreshes timestamps and metadata.
        agent.last_heartbeat_at = now;
        agent.updated_at = now;
        if let Some(dir) = working_dir {
            agent.working_dir = Some(dir);
        }
        if let Some(caps) = capabilities {
            agent.capabilities = caps;
        }
        self.storage.agents.upsert(&agent)?;

        let came_online = before == Liveness::Offline;
        if came_online {
            info!(agent_id, "Agent came back online");
        }
        Ok(HeartbeatOutcome { agent, came_online })
    }

    /// Read-triggered orphan check: an `in_progress` task whose agent has
    /// been silent past the offline threshold is failed in place. Returns
    /// the (possibly updated) task.
    pub fn reconcile_task(&self, task: Task) -> Result<Task, CoreError> {
        if task.status != TaskStatus::InProgress {
            return Ok(task);
        }
        let Some(agent) = self.storage.agents.get(&task.agent_id)? else {
            // Agent record is gone; nothing will ever finish this task.
            let outcome = self.queue.fail_task(&task.id, ORPHANED_TASK_ERROR)?;
            return Ok(outcome.task);
        };
        let now = Utc::now().timestamp_millis();
        if classify(agent.status, agent.last_heartbeat_at, now) == Liveness::Offline {
            warn!(task_id = %task.id, agent_id = %task.agent_id, "Failing orphaned task");
            let outcome = self.queue.fail_task(&task.id, ORPHANED_TASK_ERROR)?;
            return Ok(outcome.task);
        }
        Ok(task)
    }

    /// Background pass over all in_progress tasks. Idempotent with the
    /// read-triggered path. Returns the number of tasks failed.
    pub fn sweep_orphaned(&self) -> Result<u32, CoreError> {
        let mut failed = 0;
        for task in self.storage.tasks.list_in_progress()? {
            let before = task.status;
            let after = self.reconcile_task(task)?;
            if after.status != before {
                failed += 1;
            }
        }
        if failed > 0 {
            info!(failed, "Orphan sweep failed silent tasks");
        }
        Ok(failed)
    }

    /// Run `sweep_orphaned` on a ticker until the shutdown channel fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_orphaned() {
                            error!("Orphan sweep failed: {e}");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::NewTask;
    use fleetflow_storage::CredentialVault;
    use tempfile::TempDir;

    fn test_tracker() -> (LivenessTracker, Arc<TaskQueue>, Arc<Storage>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let storage = Arc::new(Storage::new(db_path.to_str().unwrap()).unwrap());
        let vault = Arc::new(CredentialVault::new(&[[7u8; 32]]).unwrap());
        let queue = Arc::new(TaskQueue::new(storage.clone(), vault));
        let tracker = LivenessTracker::new(storage.clone(), queue.clone());
        (tracker, queue, storage, temp_dir)
    }

    fn seed_agent(storage: &Storage, id: &str, last_heartbeat_at: i64) -> Agent {
        let mut agent = Agent::new(id.into(), "acct-1".into(), "worker".into());
        agent.last_heartbeat_at = last_heartbeat_at;
        storage.agents.upsert(&agent).unwrap();
        agent
    }

    fn running_task(queue: &TaskQueue, agent_id: &str) -> Task {
        let task = queue
            .enqueue(NewTask {
                account_id: "acct-1".into(),
                agent_id: agent_id.into(),
                intent: "build".into(),
                description: None,
                repo: None,
                branch: None,
                credentials: None,
                origin: None,
            })
            .unwrap();
        queue
            .apply_progress(&crate::models::ProgressUpdate {
                task_id: task.id.clone(),
                status: TaskStatus::InProgress,
                step: None,
                progress: None,
                details: None,
                error: None,
                timestamp: None,
            })
            .unwrap()
            .task
    }

    #[test]
    fn test_classify_three_tiers() {
        let now = 10 * 60 * 1000;
        // 10 s ago: online; 2 min ago: stale; 10 min ago: offline.
        assert_eq!(
            classify(AgentStatus::Online, now - 10_000, now),
            Liveness::Online
        );
        assert_eq!(
            classify(AgentStatus::Online, now - 120_000, now),
            Liveness::Stale
        );
        assert_eq!(
            classify(AgentStatus::Online, now - 600_000, now),
            Liveness::Offline
        );
    }

    #[test]
    fn test_classify_disconnected_wins() {
        let now = 10 * 60 * 1000;
        assert_eq!(
            classify(AgentStatus::Disconnected, now - 1_000, now),
            Liveness::Disconnected
        );
    }

    #[test]
    fn test_heartbeat_refreshes_and_detects_came_online() {
        let (tracker, _queue, storage, _dir) = test_tracker();
        let stale_at = Utc::now().timestamp_millis() - OFFLINE_THRESHOLD_MS - 1000;
        seed_agent(&storage, "agent-1", stale_at);

        let outcome = tracker
            .record_heartbeat("agent-1", Some("/work".into()), None)
            .unwrap();
        assert!(outcome.came_online);
        assert!(outcome.agent.last_heartbeat_at > stale_at);
        assert_eq!(outcome.agent.working_dir.as_deref(), Some("/work"));

        // A second beat right after is not a transition.
        let again = tracker.record_heartbeat("agent-1", None, None).unwrap();
        assert!(!again.came_online);
    }

    #[test]
    fn test_heartbeat_preserves_busy_status() {
        let (tracker, queue, storage, _dir) = test_tracker();
        seed_agent(&storage, "agent-1", Utc::now().timestamp_millis());
        running_task(&queue, "agent-1");
        assert_eq!(
            storage.agents.get("agent-1").unwrap().unwrap().status,
            AgentStatus::Busy
        );

        let outcome = tracker.record_heartbeat("agent-1", None, None).unwrap();
        assert_eq!(outcome.agent.status, AgentStatus::Busy);
    }

    #[test]
    fn test_heartbeat_does_not_resurrect_disconnected() {
        let (tracker, _queue, storage, _dir) = test_tracker();
        let old = Utc::now().timestamp_millis() - 1_000_000;
        let mut agent = seed_agent(&storage, "agent-1", old);
        agent.status = AgentStatus::Disconnected;
        storage.agents.upsert(&agent).unwrap();

        let outcome = tracker.record_heartbeat("agent-1", None, None).unwrap();
        assert!(!outcome.came_online);
        assert_eq!(outcome.agent.status, AgentStatus::Disconnected);
        assert_eq!(outcome.agent.last_heartbeat_at, old);
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let (tracker, _queue, _storage, _dir) = test_tracker();
        assert!(matches!(
            tracker.record_heartbeat("ghost", None, None).unwrap_err(),
            CoreError::NotFound("Agent")
        ));
    }

    #[test]
    fn test_reconcile_fails_orphaned_task() {
        let (tracker, queue, storage, _dir) = test_tracker();
        let silent_at = Utc::now().timestamp_millis() - OFFLINE_THRESHOLD_MS - 1000;
        seed_agent(&storage, "agent-1", silent_at);
        let task = running_task(&queue, "agent-1");

        let reconciled = tracker.reconcile_task(task).unwrap();
        assert_eq!(reconciled.status, TaskStatus::Failed);
        let result = reconciled.result.unwrap();
        assert_eq!(result.error.as_deref(), Some(ORPHANED_TASK_ERROR));
    }

    #[test]
    fn test_reconcile_leaves_live_agents_alone() {
        let (tracker, queue, storage, _dir) = test_tracker();
        seed_agent(&storage, "agent-1", Utc::now().timestamp_millis());
        let task = running_task(&queue, "agent-1");

        let reconciled = tracker.reconcile_task(task).unwrap();
        assert_eq!(reconciled.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_sweep_orphaned_counts_and_is_idempotent() {
        let (tracker, queue, storage, _dir) = test_tracker();
        let silent_at = Utc::now().timestamp_millis() - OFFLINE_THRESHOLD_MS - 1000;
        seed_agent(&storage, "agent-1", silent_at);
        running_task(&queue, "agent-1");
        running_task(&queue, "agent-1");

        assert_eq!(tracker.sweep_orphaned().unwrap(), 2);
        assert_eq!(tracker.sweep_orphaned().unwrap(), 0);
    }
}
