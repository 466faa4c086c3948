//! Agent lifecycle endpoints: register, heartbeat, poll, disconnect.

use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use super::{authorize_agent, authorize_owner};
use crate::daemon::http::error::ApiError;
use crate::models::{Agent, AgentStatus, OutboundMessage};
use crate::services::liveness::{classify, Liveness};
use crate::services::queue::PendingTask;
use crate::AppCore;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_agents))
        .route("/register", post(register))
        .route("/{id}/heartbeat", post(heartbeat))
        .route("/{id}/tasks", get(poll_tasks))
        .route("/{id}/disconnect", post(disconnect))
        .route("/{id}", delete(remove))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    account_id: String,
    name: String,
    /// Stable client-generated ID; omit to have the server mint one.
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    agent_id: String,
    token: String,
    /// Unix seconds.
    expires_at: i64,
}

/// Register (or re-register) an agent and issue its bearer token.
async fn register(
    Extension(core): Extension<Arc<AppCore>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    authorize_owner(&core, &headers)?;
    if req.account_id.trim().is_empty() || req.name.trim().is_empty() {
        return Err(ApiError::bad_request("account_id and name are required"));
    }

    let agent_id = req
        .agent_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut agent = match core
        .storage
        .agents
        .get(&agent_id)
        .map_err(|_| ApiError::internal())?
    {
        Some(existing) => {
            // Re-registration may not move an agent between accounts.
            if existing.account_id != req.account_id {
                return Err(ApiError::unauthorized());
            }
            existing
        }
        None => Agent::new(agent_id.clone(), req.account_id.clone(), req.name.clone()),
    };

    agent.name = req.name;
    agent.platform = req.platform.or(agent.platform);
    agent.working_dir = req.working_dir.or(agent.working_dir);
    if let Some(caps) = req.capabilities {
        agent.capabilities = caps;
    }
    agent.status = AgentStatus::Online;
    agent.last_heartbeat_at = Utc::now().timestamp_millis();
    agent.updated_at = agent.last_heartbeat_at;
    core.storage
        .agents
        .upsert(&agent)
        .map_err(|_| ApiError::internal())?;

    let issued = core.tokens.issue(&agent.id, &agent.account_id)?;
    Ok(Json(RegisterResponse {
        agent_id: agent.id,
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatRequest {
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
}

async fn heartbeat(
    Extension(core): Extension<Arc<AppCore>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize_agent(&core, &headers, &agent_id)?;

    let outcome = core
        .liveness
        .record_heartbeat(&agent_id, req.working_dir, req.capabilities)?;
    if outcome.came_online {
        let message =
            OutboundMessage::new(format!("🟢 Agent '{}' came back online", outcome.agent.name));
        if let Err(e) = core
            .notifier
            .send_to_account(&outcome.agent.account_id, &message)
            .await
        {
            warn!(%agent_id, "Online notification failed: {e}");
        }
    }

    Ok(Json(json!({
        "status": outcome.agent.status,
        "last_heartbeat_at": outcome.agent.last_heartbeat_at,
    })))
}

/// Pull-based dispatch: pending tasks for this agent, oldest first, with
/// decrypted credentials. Non-mutating, safe to poll repeatedly.
async fn poll_tasks(
    Extension(core): Extension<Arc<AppCore>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<PendingTask>>, ApiError> {
    authorize_agent(&core, &headers, &agent_id)?;
    let pending = core.queue.poll_pending(&agent_id)?;
    Ok(Json(pending))
}

async fn disconnect(
    Extension(core): Extension<Arc<AppCore>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize_owner(&core, &headers)?;
    let cancelled = core.relay.disconnect_agent(&agent_id).await?;
    Ok(Json(json!({ "tasks_cancelled": cancelled })))
}

/// Delete an agent. Active tasks are cancelled first so nothing is left
/// pointing at a missing agent.
async fn remove(
    Extension(core): Extension<Arc<AppCore>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize_owner(&core, &headers)?;
    let cancelled = core.relay.disconnect_agent(&agent_id).await?;
    core.storage
        .agents
        .delete(&agent_id)
        .map_err(|_| ApiError::internal())?;
    Ok(Json(json!({ "deleted": true, "tasks_cancelled": cancelled })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    account_id: String,
}

#[derive(Debug, Serialize)]
struct AgentView {
    #[serde(flatten)]
    agent: Agent,
    liveness: Liveness,
}

/// List an account's agents with derived liveness.
async fn list_agents(
    Extension(core): Extension<Arc<AppCore>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AgentView>>, ApiError> {
    authorize_owner(&core, &headers)?;
    let now = Utc::now().timestamp_millis();
    let agents = core
        .storage
        .agents
        .list_by_account(&query.account_id)
        .map_err(|_| ApiError::internal())?;
    let views = agents
        .into_iter()
        .map(|agent| AgentView {
            liveness: classify(agent.status, agent.last_heartbeat_at, now),
            agent,
        })
        .collect();
    Ok(Json(views))
}
