//! Outbound notification seam.
//!
//! Channel renderers (Telegram/Slack/web push) live outside this crate;
//! everything here goes through the `NotificationSender` trait. Message
//! formatting is shared so every channel gets the same text.

use async_trait::async_trait;
use tracing::info;

use crate::models::{OriginChannel, OutboundMessage, Task, TaskStatus};

const PROGRESS_BAR_SLOTS: usize = 10;

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a message to a task's origin conversation.
    async fn send(&self, origin: &OriginChannel, message: &OutboundMessage) -> anyhow::Result<()>;

    /// Deliver an account-level message (no originating conversation),
    /// e.g. "agent came online".
    async fn send_to_account(
        &self,
        account_id: &str,
        message: &OutboundMessage,
    ) -> anyhow::Result<()>;
}

/// Default sender: logs outbound messages. Stands in until a real channel
/// fan-out is wired up.
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, origin: &OriginChannel, message: &OutboundMessage) -> anyhow::Result<()> {
        info!(
            channel = ?origin.channel,
            conversation_id = %origin.conversation_id,
            "{}",
            message.content
        );
        Ok(())
    }

    async fn send_to_account(
        &self,
        account_id: &str,
        message: &OutboundMessage,
    ) -> anyhow::Result<()> {
        info!(account_id, "{}", message.content);
        Ok(())
    }
}

/// Progress message for an in-flight task: unicode bar plus current step.
pub fn format_progress_message(task: &Task) -> OutboundMessage {
    let step = task.current_step.as_deref().unwrap_or("Working");
    OutboundMessage::new(format!(
        "{} {} {}%\n{}",
        task.intent,
        progress_bar(task.progress),
        (task.progress * 100.0).round() as u32,
        step
    ))
}

/// Terminal summary for a finished task.
pub fn format_terminal_message(task: &Task) -> OutboundMessage {
    let content = match task.status {
        TaskStatus::Completed => {
            let output = task
                .result
                .as_ref()
                .and_then(|r| r.output.as_deref())
                .unwrap_or("Done");
            format!("✅ {} completed\n{}", task.intent, output)
        }
        TaskStatus::Failed => {
            let error = task
                .result
                .as_ref()
                .and_then(|r| r.error.as_deref())
                .unwrap_or("Unknown error");
            format!("❌ {} failed\n{}", task.intent, error)
        }
        TaskStatus::Cancelled => format!("🚫 {} cancelled", task.intent),
        _ => format!("{}: {:?}", task.intent, task.status),
    };
    OutboundMessage::new(content)
}

fn progress_bar(progress: f32) -> String {
    let filled = (progress.clamp(0.0, 1.0) * PROGRESS_BAR_SLOTS as f32).round() as usize;
    let mut bar = String::with_capacity(PROGRESS_BAR_SLOTS * 3);
    for i in 0..PROGRESS_BAR_SLOTS {
        bar.push(if i < filled { '▰' } else { '▱' });
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskResult;

    fn task_at(progress: f32) -> Task {
        let mut task = Task::new("acct-1".into(), "agent-1".into(), "Deploy api".into());
        task.status = TaskStatus::InProgress;
        task.set_progress(progress);
        task.current_step = Some("Running migrations".into());
        task
    }

    #[test]
    fn test_progress_bar_fill() {
        assert_eq!(progress_bar(0.0), "▱▱▱▱▱▱▱▱▱▱");
        assert_eq!(progress_bar(0.5), "▰▰▰▰▰▱▱▱▱▱");
        assert_eq!(progress_bar(1.0), "▰▰▰▰▰▰▰▰▰▰");
    }

    #[test]
    fn test_progress_message_includes_step() {
        let message = format_progress_message(&task_at(0.3));
        assert!(message.content.contains("30%"));
        assert!(message.content.contains("Running migrations"));
    }

    #[test]
    fn test_terminal_message_failure_includes_error() {
        let mut task = task_at(0.8);
        task.status = TaskStatus::Failed;
        task.result = Some(TaskResult {
            success: false,
            output: None,
            artifact_url: None,
            error: Some("compile error".into()),
        });

        let message = format_terminal_message(&task);
        assert!(message.content.contains("failed"));
        assert!(message.content.contains("compile error"));
    }
}
