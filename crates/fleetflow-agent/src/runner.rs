//! The dispatch loop: poll, execute, report, repeat.
//!
//! One task at a time. The loop claims a task by reporting `in_progress`
//! itself; until that report lands the task stays `pending` on the platform,
//! which is what makes polling safe under at-least-once delivery. Every
//! failure path converts into a `failed` progress update and the loop always
//! returns to polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use fleetflow_core::engine::{AutomationEngine, EngineEvent};
use fleetflow_core::models::{ProgressUpdate, TaskStatus};
use fleetflow_core::services::queue::PendingTask;
use fleetflow_core::services::relay::RelayDisposition;
use fleetflow_core::sessions::{SessionEntry, SessionRegistry};

use crate::client::ApiClient;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const TERMINAL_REPORT_ATTEMPTS: u32 = 3;
const TERMINAL_REPORT_BACKOFF: Duration = Duration::from_secs(2);

pub struct DispatchLoop {
    client: Arc<ApiClient>,
    engine: Arc<dyn AutomationEngine>,
    sessions: Arc<SessionRegistry>,
    agent_id: String,
    poll_interval: Duration,
}

impl DispatchLoop {
    pub fn new(
        client: Arc<ApiClient>,
        engine: Arc<dyn AutomationEngine>,
        sessions: Arc<SessionRegistry>,
        agent_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            engine,
            sessions,
            agent_id,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(agent_id = %self.agent_id, "Dispatch loop started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let orders = match self.client.poll().await {
                Ok(orders) => orders,
                Err(e) => {
                    warn!("Poll failed: {e:#}");
                    continue;
                }
            };
            let Some(order) = orders.into_iter().next() else {
                continue;
            };
            self.execute(order).await;
        }
        info!("Dispatch loop stopped");
    }

    async fn execute(&self, order: PendingTask) {
        // Claim the task. If this report fails the task stays pending and
        // shows up again on the next poll.
        let claim = update(&order.id, TaskStatus::InProgress)
            .with_step("Claimed by agent")
            .with_progress(0.0);
        match self.client.send_progress(&claim).await {
            Ok(RelayDisposition::Dropped) => {
                info!(task_id = %order.id, "Task already finished elsewhere, skipping");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(task_id = %order.id, "Failed to claim task: {e:#}");
                return;
            }
        }

        let session = match self.sessions.get(&order.id) {
            Some(existing) => existing,
            None => match self.engine.start_session(&order).await {
                Ok(handle) => {
                    self.sessions.register(
                        order.id.clone(),
                        SessionEntry::new(handle.clone(), order.id.clone(), self.agent_id.clone()),
                    );
                    handle
                }
                Err(e) => {
                    self.report_terminal(failed(&order.id, format!("Failed to start session: {e:#}")))
                        .await;
                    return;
                }
            },
        };

        let (tx, mut rx) = mpsc::channel::<EngineEvent>(32);
        let run_fut = self.engine.run(&order, session, tx);
        tokio::pin!(run_fut);

        let mut cancelled = false;
        let mut outcome = None;
        while outcome.is_none() && !cancelled {
            tokio::select! {
                result = &mut run_fut => outcome = Some(result),
                event = rx.recv() => {
                    let Some(event) = event else {
                        outcome = Some((&mut run_fut).await);
                        break;
                    };
                    let Some(progress) = progress_from_event(&order.id, &event) else {
                        continue;
                    };
                    match self.client.send_progress(&progress).await {
                        // Cancelled platform-side: dropping run_fut below is
                        // the cooperative abort.
                        Ok(RelayDisposition::Dropped) => cancelled = true,
                        Ok(_) => {}
                        Err(e) => warn!(task_id = %order.id, "Progress report failed: {e:#}"),
                    }
                }
            }
        }

        if cancelled {
            info!(task_id = %order.id, "Task cancelled by platform, abandoning run");
            self.teardown(&order.id).await;
            return;
        }

        let terminal = match outcome {
            Some(Ok(run)) if run.success => {
                let mut done = update(&order.id, TaskStatus::Completed).with_progress(1.0);
                done.details = run.output;
                done
            }
            Some(Ok(run)) => failed(
                &order.id,
                run.error
                    .unwrap_or_else(|| "Automation run failed".to_string()),
            ),
            Some(Err(e)) => failed(&order.id, format!("{e:#}")),
            None => return,
        };
        self.report_terminal(terminal).await;
        self.teardown(&order.id).await;
    }

    /// The terminal report must reach the platform; retry a few times
    /// before giving up and letting orphan reconciliation catch it.
    async fn report_terminal(&self, update: ProgressUpdate) {
        for attempt in 1..=TERMINAL_REPORT_ATTEMPTS {
            match self.client.send_progress(&update).await {
                Ok(_) => return,
                Err(e) if attempt < TERMINAL_REPORT_ATTEMPTS => {
                    warn!(task_id = %update.task_id, attempt, "Terminal report failed, retrying: {e:#}");
                    tokio::time::sleep(TERMINAL_REPORT_BACKOFF).await;
                }
                Err(e) => {
                    warn!(task_id = %update.task_id, "Giving up on terminal report: {e:#}");
                }
            }
        }
    }

    async fn teardown(&self, task_id: &str) {
        if let Some(entry) = self.sessions.remove(task_id) {
            entry.handle.close().await;
        }
    }
}

fn update(task_id: &str, status: TaskStatus) -> ProgressUpdate {
    ProgressUpdate {
        task_id: task_id.to_string(),
        status,
        step: None,
        progress: None,
        details: None,
        error: None,
        timestamp: None,
    }
}

fn failed(task_id: &str, error: String) -> ProgressUpdate {
    let mut u = update(task_id, TaskStatus::Failed);
    u.error = Some(error);
    u
}

fn progress_from_event(task_id: &str, event: &EngineEvent) -> Option<ProgressUpdate> {
    match event {
        EngineEvent::StepStarted { step } => {
            Some(update(task_id, TaskStatus::InProgress).with_step(step))
        }
        EngineEvent::Progress { step, progress } => Some(
            update(task_id, TaskStatus::InProgress)
                .with_step(step)
                .with_progress(*progress),
        ),
        // The run outcome is authoritative for terminal states.
        EngineEvent::Completed { .. } | EngineEvent::Failed { .. } => None,
    }
}

trait UpdateExt {
    fn with_step(self, step: &str) -> Self;
    fn with_progress(self, progress: f32) -> Self;
}

impl UpdateExt for ProgressUpdate {
    fn with_step(mut self, step: &str) -> Self {
        self.step = Some(step.to_string());
        self
    }

    fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }
}
