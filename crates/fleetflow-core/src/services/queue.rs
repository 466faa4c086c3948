//! Task queue: enqueue, poll, progress application, cancellation.
//!
//! All state-machine enforcement lives here. The relay and HTTP layers call
//! in; they never mutate task status themselves.

use std::sync::Arc;

use chrono::Utc;
use fleetflow_storage::CredentialVault;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::models::{
    AgentStatus, OriginChannel, ProgressUpdate, Task, TaskLogLevel, TaskResult, TaskStatus,
};
use crate::storage::Storage;

/// Step label stamped on owner-initiated cancellations.
pub const CANCELLED_STEP: &str = "Cancelled by user";

/// Step label stamped on disconnect-cascade cancellations.
pub const DISCONNECTED_STEP: &str = "Agent disconnected";

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub account_id: String,
    pub agent_id: String,
    pub intent: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Plaintext credential bundle; encrypted before it ever hits disk.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub origin: Option<OriginChannel>,
}

/// What an agent sees when it polls: the work order plus decrypted
/// credentials. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: String,
    pub intent: String,
    pub description: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub credentials: Option<String>,
    pub created_at: i64,
}

/// Result of applying a progress update.
///
/// `transitioned` is true when the status actually changed edge-wise;
/// duplicate same-status updates come back accepted but untransitioned, which
/// is how the relay avoids double-notifying terminal states.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub task: Task,
    pub transitioned: bool,
    pub changed: bool,
}

pub struct TaskQueue {
    storage: Arc<Storage>,
    vault: Arc<CredentialVault>,
}

impl TaskQueue {
    pub fn new(storage: Arc<Storage>, vault: Arc<CredentialVault>) -> Self {
        Self { storage, vault }
    }

    /// Create a pending task targeted at one agent.
    pub fn enqueue(&self, spec: NewTask) -> Result<Task, CoreError> {
        if spec.account_id.trim().is_empty()
            || spec.agent_id.trim().is_empty()
            || spec.intent.trim().is_empty()
        {
            return Err(CoreError::Invalid(
                "account_id, agent_id and intent are required".to_string(),
            ));
        }

        let agent = self
            .storage
            .agents
            .get(&spec.agent_id)?
            .ok_or(CoreError::NotFound("Agent"))?;
        if agent.account_id != spec.account_id {
            return Err(CoreError::NotFound("Agent"));
        }

        let mut task = Task::new(spec.account_id, spec.agent_id, spec.intent);
        task.description = spec.description;
        task.repo = spec.repo;
        task.branch = spec.branch;
        task.origin = spec.origin;
        if let Some(plaintext) = spec.credentials {
            task.credentials = Some(self.vault.encrypt(&plaintext)?);
        }

        self.storage.tasks.put(&task)?;
        info!(task_id = %task.id, agent_id = %task.agent_id, "Task enqueued");
        Ok(task)
    }

    /// Pending tasks for an agent, oldest first, credentials decrypted.
    ///
    /// Non-mutating: tasks stay `pending` until the agent reports
    /// `in_progress` itself, which keeps polling safe to retry.
    pub fn poll_pending(&self, agent_id: &str) -> Result<Vec<PendingTask>, CoreError> {
        let tasks = self.storage.tasks.list_pending_for_agent(agent_id)?;
        let mut pending = Vec::with_capacity(tasks.len());
        for task in tasks {
            let credentials = match &task.credentials {
                Some(envelope) => match self.vault.decrypt(envelope) {
                    Ok(plaintext) => Some(plaintext),
                    // Degrade to "no credential" rather than failing dispatch.
                    Err(_) => {
                        warn!(task_id = %task.id, "Credential unavailable, dispatching without it");
                        None
                    }
                },
                None => None,
            };
            pending.push(PendingTask {
                id: task.id,
                intent: task.intent,
                description: task.description,
                repo: task.repo,
                branch: task.branch,
                credentials,
                created_at: task.created_at,
            });
        }
        Ok(pending)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>, CoreError> {
        Ok(self.storage.tasks.get(task_id)?)
    }

    /// Apply a progress/completion update against the state machine.
    ///
    /// Duplicate updates with the task's current status are accepted
    /// idempotently (progress/step folded in, no transition). Illegal edges
    /// return `IllegalTransition`; the caller decides whether that is an
    /// error or a drop.
    pub fn apply_progress(&self, update: &ProgressUpdate) -> Result<ApplyOutcome, CoreError> {
        let mut task = self
            .storage
            .tasks
            .get(&update.task_id)?
            .ok_or(CoreError::NotFound("Task"))?;
        let from = task.status;
        let to = update.status;

        if from == to {
            if from.is_terminal() {
                return Ok(ApplyOutcome {
                    task,
                    transitioned: false,
                    changed: false,
                });
            }
            let changed = self.fold_fields(&mut task, update);
            if changed {
                task.push_log(TaskLogLevel::Info, describe_update(update));
                self.storage.tasks.put(&task)?;
            }
            return Ok(ApplyOutcome {
                task,
                transitioned: false,
                changed,
            });
        }

        if !from.can_transition_to(to) {
            return Err(CoreError::IllegalTransition { from, to });
        }

        let now = update.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        task.status = to;
        self.fold_fields(&mut task, update);
        match to {
            TaskStatus::InProgress => {
                if task.started_at.is_none() {
                    task.started_at = Some(now);
                }
            }
            TaskStatus::Completed => {
                task.completed_at = Some(now);
                task.set_progress(1.0);
                task.result = Some(TaskResult {
                    success: true,
                    output: update.details.clone(),
                    artifact_url: None,
                    error: None,
                });
            }
            TaskStatus::Failed => {
                task.completed_at = Some(now);
                task.result = Some(TaskResult {
                    success: false,
                    output: None,
                    artifact_url: None,
                    error: update.error.clone().or_else(|| update.details.clone()),
                });
            }
            TaskStatus::Cancelled => {
                task.completed_at = Some(now);
            }
            TaskStatus::Pending => unreachable!("no edge leads back to pending"),
        }

        let level = if to == TaskStatus::Failed {
            TaskLogLevel::Error
        } else {
            TaskLogLevel::Info
        };
        task.push_log(level, describe_update(update));
        self.storage.tasks.put(&task)?;
        info!(task_id = %task.id, from = ?from, to = ?to, "Task transitioned");
        self.sync_agent_status(&task.agent_id)?;

        Ok(ApplyOutcome {
            task,
            transitioned: true,
            changed: true,
        })
    }

    /// Owner-initiated cancel. Only pending/in_progress tasks can be
    /// cancelled; terminal tasks come back as `IllegalTransition`.
    pub fn cancel(&self, task_id: &str) -> Result<Task, CoreError> {
        self.cancel_with_label(task_id, CANCELLED_STEP)
    }

    fn cancel_with_label(&self, task_id: &str, label: &str) -> Result<Task, CoreError> {
        let mut task = self
            .storage
            .tasks
            .get(task_id)?
            .ok_or(CoreError::NotFound("Task"))?;
        let from = task.status;
        if !from.can_transition_to(TaskStatus::Cancelled) {
            return Err(CoreError::IllegalTransition {
                from,
                to: TaskStatus::Cancelled,
            });
        }

        task.status = TaskStatus::Cancelled;
        task.current_step = Some(label.to_string());
        task.completed_at = Some(Utc::now().timestamp_millis());
        task.push_log(TaskLogLevel::Info, label);
        self.storage.tasks.put(&task)?;
        info!(task_id = %task.id, from = ?from, "Task cancelled");
        self.sync_agent_status(&task.agent_id)?;
        Ok(task)
    }

    /// Fail a task from the platform side (orphan reconciliation).
    pub fn fail_task(&self, task_id: &str, error: &str) -> Result<ApplyOutcome, CoreError> {
        self.apply_progress(&ProgressUpdate {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            step: None,
            progress: None,
            details: None,
            error: Some(error.to_string()),
            timestamp: None,
        })
    }

    /// Delete tasks by ID, scoped to one account. IDs that do not exist or
    /// belong to another account are skipped silently. Returns the count
    /// actually deleted.
    pub fn bulk_delete(&self, task_ids: &[String], account_id: &str) -> Result<usize, CoreError> {
        let mut deleted = 0;
        for id in task_ids {
            match self.storage.tasks.get(id)? {
                Some(task) if task.account_id == account_id => {
                    if self.storage.tasks.delete(id)? {
                        deleted += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(deleted)
    }

    /// Mark an agent disconnected and cancel everything still active on it.
    /// Returns the cancelled tasks so the caller can notify their origin
    /// channels.
    pub fn disconnect_agent(&self, agent_id: &str) -> Result<Vec<Task>, CoreError> {
        let mut agent = self
            .storage
            .agents
            .get(agent_id)?
            .ok_or(CoreError::NotFound("Agent"))?;
        agent.status = AgentStatus::Disconnected;
        agent.updated_at = Utc::now().timestamp_millis();
        self.storage.agents.upsert(&agent)?;

        let mut cancelled = Vec::new();
        for task in self.storage.tasks.list_active_for_agent(agent_id)? {
            cancelled.push(self.cancel_with_label(&task.id, DISCONNECTED_STEP)?);
        }
        info!(agent_id, cancelled = cancelled.len(), "Agent disconnected");
        Ok(cancelled)
    }

    /// Keep the agent's explicit status in step with its workload: `busy`
    /// while it has an in_progress task, back to `online` once the last one
    /// reaches a terminal state. Disconnected agents are never touched.
    fn sync_agent_status(&self, agent_id: &str) -> Result<(), CoreError> {
        let Some(mut agent) = self.storage.agents.get(agent_id)? else {
            return Ok(());
        };
        if agent.is_disconnected() {
            return Ok(());
        }
        let busy = self
            .storage
            .tasks
            .list_in_progress()?
            .iter()
            .any(|t| t.agent_id == agent_id);
        let target = if busy {
            AgentStatus::Busy
        } else {
            AgentStatus::Online
        };
        if agent.status != target {
            agent.status = target;
            agent.updated_at = Utc::now().timestamp_millis();
            self.storage.agents.upsert(&agent)?;
        }
        Ok(())
    }

    /// Fold progress/step from an update into the task. Returns whether
    /// anything actually changed.
    fn fold_fields(&self, task: &mut Task, update: &ProgressUpdate) -> bool {
        let mut changed = false;
        if let Some(progress) = update.progress {
            let clamped = progress.clamp(0.0, 1.0);
            if (clamped - task.progress).abs() > f32::EPSILON {
                task.set_progress(clamped);
                changed = true;
            }
        }
        if let Some(step) = &update.step {
            if task.current_step.as_deref() != Some(step.as_str()) {
                task.current_step = Some(step.clone());
                changed = true;
            }
        }
        changed
    }
}

fn describe_update(update: &ProgressUpdate) -> String {
    if let Some(step) = &update.step {
        step.clone()
    } else if let Some(error) = &update.error {
        error.clone()
    } else if let Some(details) = &update.details {
        details.clone()
    } else {
        format!("status: {:?}", update.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Agent;
    use tempfile::TempDir;

    fn test_queue() -> (TaskQueue, Arc<Storage>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let storage = Arc::new(Storage::new(db_path.to_str().unwrap()).unwrap());
        let vault = Arc::new(CredentialVault::new(&[[7u8; 32]]).unwrap());
        storage
            .agents
            .upsert(&Agent::new("agent-1".into(), "acct-1".into(), "worker".into()))
            .unwrap();
        (TaskQueue::new(storage.clone(), vault), storage, temp_dir)
    }

    fn spec(credentials: Option<&str>) -> NewTask {
        NewTask {
            account_id: "acct-1".into(),
            agent_id: "agent-1".into(),
            intent: "deploy the release".into(),
            description: None,
            repo: Some("github.com/acme/app".into()),
            branch: Some("main".into()),
            credentials: credentials.map(String::from),
            origin: None,
        }
    }

    fn update(task_id: &str, status: TaskStatus, progress: Option<f32>) -> ProgressUpdate {
        ProgressUpdate {
            task_id: task_id.into(),
            status,
            step: Some("working".into()),
            progress,
            details: None,
            error: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_enqueue_encrypts_credentials_at_rest() {
        let (queue, storage, _dir) = test_queue();

        let task = queue.enqueue(spec(Some("ghp_secret"))).unwrap();

        let stored = storage.tasks.get(&task.id).unwrap().unwrap();
        let envelope = stored.credentials.unwrap();
        assert_ne!(envelope, "ghp_secret");
        assert_eq!(envelope.split(':').count(), 3);
    }

    #[test]
    fn test_enqueue_rejects_blank_intent() {
        let (queue, _storage, _dir) = test_queue();
        let mut bad = spec(None);
        bad.intent = "   ".into();

        assert!(matches!(
            queue.enqueue(bad).unwrap_err(),
            CoreError::Invalid(_)
        ));
    }

    #[test]
    fn test_enqueue_unknown_agent() {
        let (queue, _storage, _dir) = test_queue();
        let mut bad = spec(None);
        bad.agent_id = "ghost".into();

        assert!(matches!(
            queue.enqueue(bad).unwrap_err(),
            CoreError::NotFound("Agent")
        ));
    }

    #[test]
    fn test_poll_returns_decrypted_credentials() {
        let (queue, _storage, _dir) = test_queue();
        queue.enqueue(spec(Some("ghp_secret"))).unwrap();

        let pending = queue.poll_pending("agent-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].credentials.as_deref(), Some("ghp_secret"));
    }

    #[test]
    fn test_poll_is_non_mutating() {
        let (queue, storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();

        queue.poll_pending("agent-1").unwrap();
        queue.poll_pending("agent-1").unwrap();

        let stored = storage.tasks.get(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[test]
    fn test_duplicate_progress_is_idempotent() {
        let (queue, _storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, Some(0.0)))
            .unwrap();

        let first = queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, Some(0.3)))
            .unwrap();
        assert!(first.changed);
        let logs_after_first = first.task.logs.len();

        let dup = queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, Some(0.3)))
            .unwrap();
        assert!(!dup.transitioned);
        assert!(!dup.changed);
        assert_eq!(dup.task.progress, 0.3);
        assert_eq!(dup.task.logs.len(), logs_after_first);
    }

    #[test]
    fn test_completed_is_final() {
        let (queue, _storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, None))
            .unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::Completed, None))
            .unwrap();

        let err = queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, Some(0.5)))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::InProgress,
            }
        ));
    }

    #[test]
    fn test_duplicate_terminal_update_is_noop() {
        let (queue, _storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, None))
            .unwrap();
        let done = queue
            .apply_progress(&update(&task.id, TaskStatus::Completed, None))
            .unwrap();
        assert!(done.transitioned);

        let dup = queue
            .apply_progress(&update(&task.id, TaskStatus::Completed, None))
            .unwrap();
        assert!(!dup.transitioned);
        assert!(!dup.changed);
    }

    #[test]
    fn test_completion_sets_result_and_full_progress() {
        let (queue, _storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, Some(0.4)))
            .unwrap();

        let mut finish = update(&task.id, TaskStatus::Completed, None);
        finish.details = Some("all green".into());
        let outcome = queue.apply_progress(&finish).unwrap();

        assert_eq!(outcome.task.progress, 1.0);
        assert!(outcome.task.completed_at.is_some());
        let result = outcome.task.result.unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("all green"));
    }

    #[test]
    fn test_cancel_pending_task() {
        let (queue, _storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();

        let cancelled = queue.cancel(&task.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.current_step.as_deref(), Some(CANCELLED_STEP));
        assert!(cancelled.completed_at.is_some());
    }

    #[test]
    fn test_cancel_terminal_task_rejected() {
        let (queue, _storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, None))
            .unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::Failed, None))
            .unwrap();

        assert!(matches!(
            queue.cancel(&task.id).unwrap_err(),
            CoreError::IllegalTransition { .. }
        ));
    }

    #[test]
    fn test_bulk_delete_scoped_to_account() {
        let (queue, storage, _dir) = test_queue();
        storage
            .agents
            .upsert(&Agent::new("agent-2".into(), "acct-2".into(), "other".into()))
            .unwrap();
        let mine = queue.enqueue(spec(None)).unwrap();
        let theirs = queue
            .enqueue(NewTask {
                account_id: "acct-2".into(),
                agent_id: "agent-2".into(),
                intent: "their task".into(),
                description: None,
                repo: None,
                branch: None,
                credentials: None,
                origin: None,
            })
            .unwrap();

        let ids = vec![mine.id.clone(), theirs.id.clone(), "ghost".to_string()];
        let deleted = queue.bulk_delete(&ids, "acct-1").unwrap();

        assert_eq!(deleted, 1);
        assert!(storage.tasks.get(&mine.id).unwrap().is_none());
        assert!(storage.tasks.get(&theirs.id).unwrap().is_some());
    }

    #[test]
    fn test_agent_busy_while_task_runs() {
        let (queue, storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        assert_eq!(
            storage.agents.get("agent-1").unwrap().unwrap().status,
            AgentStatus::Online
        );

        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, None))
            .unwrap();
        assert_eq!(
            storage.agents.get("agent-1").unwrap().unwrap().status,
            AgentStatus::Busy
        );

        queue
            .apply_progress(&update(&task.id, TaskStatus::Completed, None))
            .unwrap();
        assert_eq!(
            storage.agents.get("agent-1").unwrap().unwrap().status,
            AgentStatus::Online
        );
    }

    #[test]
    fn test_cancel_running_task_frees_agent() {
        let (queue, storage, _dir) = test_queue();
        let task = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&task.id, TaskStatus::InProgress, None))
            .unwrap();
        assert_eq!(
            storage.agents.get("agent-1").unwrap().unwrap().status,
            AgentStatus::Busy
        );

        queue.cancel(&task.id).unwrap();
        assert_eq!(
            storage.agents.get("agent-1").unwrap().unwrap().status,
            AgentStatus::Online
        );
    }

    #[test]
    fn test_disconnect_cancels_active_tasks() {
        let (queue, storage, _dir) = test_queue();
        let pending = queue.enqueue(spec(None)).unwrap();
        let running = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&running.id, TaskStatus::InProgress, None))
            .unwrap();
        let done = queue.enqueue(spec(None)).unwrap();
        queue
            .apply_progress(&update(&done.id, TaskStatus::InProgress, None))
            .unwrap();
        queue
            .apply_progress(&update(&done.id, TaskStatus::Completed, None))
            .unwrap();

        let cancelled = queue.disconnect_agent("agent-1").unwrap();
        assert_eq!(cancelled.len(), 2);

        let agent = storage.agents.get("agent-1").unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Disconnected);
        assert_eq!(
            storage.tasks.get(&pending.id).unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(
            storage.tasks.get(&running.id).unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(
            storage.tasks.get(&done.id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }
}
