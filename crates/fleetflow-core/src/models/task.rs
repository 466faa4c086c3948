//! Task documents and the queue state machine.
//!
//! Legal edges: `pending -> in_progress -> {completed, failed}`, plus
//! `{pending, in_progress} -> cancelled`. Terminal states accept no further
//! edges; duplicate same-status updates are handled idempotently one layer
//! up, in the queue service.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::channel::OriginChannel;

/// Ring cap on per-task execution logs; older entries are dropped first.
pub const MAX_TASK_LOG_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge. Self-loops are not edges;
    /// the queue layer decides whether to accept them idempotently.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress) => true,
            (TaskStatus::InProgress, TaskStatus::Completed) => true,
            (TaskStatus::InProgress, TaskStatus::Failed) => true,
            (TaskStatus::Pending | TaskStatus::InProgress, TaskStatus::Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub timestamp: i64,
    pub level: TaskLogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub artifact_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub account_id: String,
    pub agent_id: String,
    pub intent: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    pub status: TaskStatus,
    /// Fraction complete in [0, 1]; clamped on every write.
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub current_step: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub logs: Vec<TaskLogEntry>,
    /// Vault envelope, never plaintext at rest.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub origin: Option<OriginChannel>,
}

impl Task {
    pub fn new(account_id: String, agent_id: String, intent: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            agent_id,
            intent,
            description: None,
            repo: None,
            branch: None,
            status: TaskStatus::Pending,
            progress: 0.0,
            current_step: None,
            created_at: Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
            result: None,
            logs: Vec::new(),
            credentials: None,
            origin: None,
        }
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.progress = progress.clamp(0.0, 1.0);
    }

    /// Append a log line, dropping the oldest entries past the ring cap.
    pub fn push_log(&mut self, level: TaskLogLevel, message: impl Into<String>) {
        self.logs.push(TaskLogEntry {
            timestamp: Utc::now().timestamp_millis(),
            level,
            message: message.into(),
        });
        if self.logs.len() > MAX_TASK_LOG_ENTRIES {
            let excess = self.logs.len() - MAX_TASK_LOG_ENTRIES;
            self.logs.drain(..excess);
        }
    }
}

/// Wire shape of a progress/completion event from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}
