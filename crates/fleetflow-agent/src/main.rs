//! FleetFlow agent: registers with the platform, heartbeats, and runs the
//! pull-based dispatch loop.

mod client;
mod engine;
mod heartbeat;
mod runner;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetflow_core::sessions::{SessionRegistry, DEFAULT_SESSION_TTL};

use client::{ApiClient, RegisterRequest};
use engine::CliEngine;
use heartbeat::{spawn_heartbeat, DEFAULT_HEARTBEAT_INTERVAL};
use runner::{DispatchLoop, DEFAULT_POLL_INTERVAL};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "fleetflow-agent", about = "FleetFlow worker agent")]
struct Args {
    /// Platform base URL
    #[arg(long, env = "FLEETFLOW_SERVER_URL", default_value = "http://127.0.0.1:9800")]
    server_url: String,

    /// Account this agent belongs to
    #[arg(long, env = "FLEETFLOW_ACCOUNT_ID")]
    account_id: String,

    /// Shared key for owner endpoints (registration)
    #[arg(long, env = "FLEETFLOW_ACCOUNT_KEY")]
    account_key: Option<String>,

    /// Display name for this agent
    #[arg(long, env = "FLEETFLOW_AGENT_NAME", default_value = "fleetflow-agent")]
    name: String,

    /// Stable agent ID; omit on first run to have the server mint one
    #[arg(long, env = "FLEETFLOW_AGENT_ID")]
    agent_id: Option<String>,

    /// Automation command to run for each task
    #[arg(long, env = "FLEETFLOW_ENGINE_CMD")]
    engine_cmd: String,

    /// Working directory for automation runs
    #[arg(long, env = "FLEETFLOW_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Seconds between queue polls
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval: u64,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    heartbeat_interval: u64,

    /// Per-task timeout in seconds
    #[arg(long, default_value_t = 3600)]
    task_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let workdir = args.workdir.canonicalize().unwrap_or(args.workdir.clone());

    let capabilities = vec!["cli".to_string()];

    let client = Arc::new(ApiClient::new(args.server_url.clone(), args.account_key.clone()));
    let agent_id = client
        .register(&RegisterRequest {
            account_id: args.account_id.clone(),
            name: args.name.clone(),
            agent_id: args.agent_id.clone(),
            platform: Some(std::env::consts::OS.to_string()),
            working_dir: Some(workdir.display().to_string()),
            capabilities: capabilities.clone(),
        })
        .await?;
    info!(%agent_id, "Registered with platform");

    let (shutdown_tx, _) = broadcast::channel(1);

    let heartbeat_handle = spawn_heartbeat(
        client.clone(),
        Some(workdir.display().to_string()),
        capabilities,
        Duration::from_secs(args.heartbeat_interval),
        shutdown_tx.subscribe(),
    );

    let sessions = Arc::new(SessionRegistry::new(DEFAULT_SESSION_TTL));
    let sweeper_handle = sessions
        .clone()
        .spawn_sweeper(SESSION_SWEEP_INTERVAL, shutdown_tx.subscribe());

    let engine = Arc::new(CliEngine::new(
        args.engine_cmd.clone(),
        workdir,
        Duration::from_secs(args.task_timeout),
    ));
    let dispatch = DispatchLoop::new(
        client,
        engine,
        sessions.clone(),
        agent_id,
        Duration::from_secs(args.poll_interval),
    );

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = ctrl_c_tx.send(());
        }
    });

    dispatch.run(shutdown_tx.subscribe()).await;

    sessions.shutdown().await;
    let _ = heartbeat_handle.await;
    let _ = sweeper_handle.await;
    Ok(())
}
