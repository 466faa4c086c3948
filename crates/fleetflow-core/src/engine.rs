//! Automation-engine boundary.
//!
//! The engine is a black box. Its raw output shapes never escape the
//! adapter: implementations translate everything into the closed
//! `EngineEvent` enum at the boundary, and unknown shapes become
//! `EngineEvent::Failed` rather than leaking through.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::services::queue::PendingTask;

/// Progress surfaced by an engine run, already normalized.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StepStarted { step: String },
    Progress { step: String, progress: f32 },
    Completed { output: String },
    Failed { error: String },
}

/// Final result of a run, after the event stream closes.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// A live engine workspace. Handles are shared through the session
/// registry; `close` releases whatever the engine holds open.
#[async_trait]
pub trait EngineSession: Send + Sync {
    fn id(&self) -> &str;
    async fn close(&self);
}

#[async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Open (or prepare) a workspace for the work order.
    async fn start_session(&self, order: &PendingTask) -> anyhow::Result<Arc<dyn EngineSession>>;

    /// Execute the work order inside the session, streaming normalized
    /// events. The returned outcome is authoritative; events are advisory
    /// progress.
    async fn run(
        &self,
        order: &PendingTask,
        session: Arc<dyn EngineSession>,
        events: mpsc::Sender<EngineEvent>,
    ) -> anyhow::Result<EngineOutcome>;
}
