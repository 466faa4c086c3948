//! CLI automation engine adapter.
//!
//! Runs the configured automation command as a black box and translates its
//! behavior into the closed `EngineEvent` stream. The command's raw output
//! never escapes this module.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fleetflow_core::engine::{AutomationEngine, EngineEvent, EngineOutcome, EngineSession};
use fleetflow_core::services::queue::PendingTask;

const OUTPUT_TAIL_LINES: usize = 50;

pub struct CliSession {
    id: String,
}

#[async_trait]
impl EngineSession for CliSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) {
        debug!(session_id = %self.id, "Closing CLI session");
    }
}

pub struct CliEngine {
    command: String,
    workdir: PathBuf,
    timeout: Duration,
}

impl CliEngine {
    pub fn new(command: String, workdir: PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            workdir,
            timeout,
        }
    }
}

#[async_trait]
impl AutomationEngine for CliEngine {
    async fn start_session(&self, order: &PendingTask) -> Result<Arc<dyn EngineSession>> {
        Ok(Arc::new(CliSession {
            id: order.id.clone(),
        }))
    }

    async fn run(
        &self,
        order: &PendingTask,
        session: Arc<dyn EngineSession>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<EngineOutcome> {
        let _ = events
            .send(EngineEvent::StepStarted {
                step: "Starting automation run".to_string(),
            })
            .await;

        let mut command = Command::new(&self.command);
        command
            .arg(&order.intent)
            .current_dir(&self.workdir)
            .env("FLEETFLOW_TASK_ID", &order.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(description) = &order.description {
            command.env("FLEETFLOW_TASK_DESCRIPTION", description);
        }
        if let Some(repo) = &order.repo {
            command.env("FLEETFLOW_REPO", repo);
        }
        if let Some(branch) = &order.branch {
            command.env("FLEETFLOW_BRANCH", branch);
        }
        // Credentials travel through the environment, never argv.
        if let Some(credentials) = &order.credentials {
            command.env("FLEETFLOW_CREDENTIALS", credentials);
        }

        info!(task_id = %order.id, session_id = %session.id(), "Launching automation command");
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch '{}'", self.command))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Every stdout line becomes a step event; the last lines double as
        // the run output.
        let events_out = events.clone();
        let stdout_tail = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = events_out
                        .send(EngineEvent::StepStarted {
                            step: trimmed.to_string(),
                        })
                        .await;
                    tail.push(trimmed.to_string());
                    if tail.len() > OUTPUT_TAIL_LINES {
                        tail.remove(0);
                    }
                }
            }
            tail
        });
        let stderr_tail = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tail.push(line);
                    if tail.len() > OUTPUT_TAIL_LINES {
                        tail.remove(0);
                    }
                }
            }
            tail
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.context("failed to wait on automation command")?,
            Err(_) => {
                warn!(task_id = %order.id, "Automation command timed out, killing it");
                let _ = child.kill().await;
                let error = format!(
                    "Automation command exceeded the {}s timeout",
                    self.timeout.as_secs()
                );
                let _ = events
                    .send(EngineEvent::Failed {
                        error: error.clone(),
                    })
                    .await;
                return Ok(EngineOutcome {
                    success: false,
                    output: None,
                    error: Some(error),
                });
            }
        };

        let stdout_lines = stdout_tail.await.unwrap_or_default();
        let stderr_lines = stderr_tail.await.unwrap_or_default();
        let output = (!stdout_lines.is_empty()).then(|| stdout_lines.join("\n"));

        if status.success() {
            let _ = events
                .send(EngineEvent::Completed {
                    output: output.clone().unwrap_or_default(),
                })
                .await;
            Ok(EngineOutcome {
                success: true,
                output,
                error: None,
            })
        } else {
            let error = if stderr_lines.is_empty() {
                format!("Automation command exited with {status}")
            } else {
                stderr_lines.join("\n")
            };
            let _ = events
                .send(EngineEvent::Failed {
                    error: error.clone(),
                })
                .await;
            Ok(EngineOutcome {
                success: false,
                output,
                error: Some(error),
            })
        }
    }
}
