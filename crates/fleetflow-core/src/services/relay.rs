//! Progress relay: agent events in, channel notifications out.
//!
//! The state mutation is mandatory, the notification is best effort. The
//! update is applied to the state machine first; only accepted changes fan
//! out, which is what guarantees exactly one outbound notification per
//! terminal transition under at-least-once delivery. Illegal transitions
//! are logged and dropped so agent retransmissions stay harmless.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::TokenClaims;
use crate::error::CoreError;
use crate::models::{ProgressUpdate, Task, TaskStatus};
use crate::notify::{format_progress_message, format_terminal_message, NotificationSender};
use crate::services::queue::TaskQueue;

/// What happened to an inbound update. Serialized back to the agent so it
/// can notice that a task was cancelled out from under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayDisposition {
    /// Applied and (where relevant) notified.
    Applied,
    /// Accepted idempotently with nothing new to say.
    Duplicate,
    /// Illegal transition, logged and discarded.
    Dropped,
}

pub struct ProgressRelay {
    queue: Arc<TaskQueue>,
    notifier: Arc<dyn NotificationSender>,
}

impl ProgressRelay {
    pub fn new(queue: Arc<TaskQueue>, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { queue, notifier }
    }

    /// Handle one progress/completion event from an authenticated agent.
    ///
    /// Unknown task: `NotFound`, no side effects. Foreign task (claims do
    /// not match the task's agent): opaque `Auth`.
    pub async fn handle(
        &self,
        update: ProgressUpdate,
        claims: &TokenClaims,
    ) -> Result<RelayDisposition, CoreError> {
        let task = self
            .queue
            .get_task(&update.task_id)?
            .ok_or(CoreError::NotFound("Task"))?;
        if task.agent_id != claims.agent_id {
            // Caller holds a valid token for some other agent.
            return Err(CoreError::Auth);
        }

        let outcome = match self.queue.apply_progress(&update) {
            Ok(outcome) => outcome,
            Err(CoreError::IllegalTransition { from, to }) => {
                warn!(
                    task_id = %update.task_id,
                    ?from,
                    ?to,
                    "Dropping update with illegal transition"
                );
                return Ok(RelayDisposition::Dropped);
            }
            Err(e) => return Err(e),
        };

        let notified = if outcome.transitioned && outcome.task.status.is_terminal() {
            self.notify(&outcome.task, true).await;
            true
        } else if outcome.task.status == TaskStatus::InProgress
            && (outcome.transitioned || outcome.changed)
        {
            self.notify(&outcome.task, false).await;
            true
        } else {
            false
        };

        if notified {
            Ok(RelayDisposition::Applied)
        } else {
            Ok(RelayDisposition::Duplicate)
        }
    }

    /// Notify an owner-initiated cancellation to the task's origin channel.
    pub async fn notify_cancelled(&self, task: &Task) {
        self.notify(task, true).await;
    }

    /// Disconnect an agent: cancel everything still active on it and notify
    /// each cancellation, so a cascade reaches origin channels the same way
    /// a direct cancel does. Returns the number of tasks cancelled.
    pub async fn disconnect_agent(&self, agent_id: &str) -> Result<u32, CoreError> {
        let cancelled = self.queue.disconnect_agent(agent_id)?;
        for task in &cancelled {
            self.notify(task, true).await;
        }
        Ok(cancelled.len() as u32)
    }

    async fn notify(&self, task: &Task, terminal: bool) {
        let Some(origin) = &task.origin else {
            return;
        };
        let message = if terminal {
            format_terminal_message(task)
        } else {
            format_progress_message(task)
        };
        // Best effort: delivery failure never rolls back state.
        if let Err(e) = self.notifier.send(origin, &message).await {
            warn!(task_id = %task.id, "Notification delivery failed: {e}");
        } else {
            info!(task_id = %task.id, "Notified origin channel");
        }
    }
}
