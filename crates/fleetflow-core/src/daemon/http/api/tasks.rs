//! Owner-facing task endpoints: dispatch, read, cancel, bulk delete.
//!
//! Read paths run the lazy orphan reconcile so a task whose agent died is
//! reported `failed` the moment anyone looks at it. Credential envelopes are
//! scrubbed from every response; only the agent poll path sees credentials.

use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::authorize_owner;
use crate::daemon::http::error::ApiError;
use crate::models::Task;
use crate::services::queue::NewTask;
use crate::AppCore;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_task).get(list_tasks).delete(bulk_delete))
        .route("/{id}", get(get_task))
        .route("/{id}/cancel", post(cancel_task))
}

fn scrub(mut task: Task) -> Task {
    task.credentials = None;
    task
}

/// Dispatch a task to an agent (enqueue as `pending`).
async fn create_task(
    Extension(core): Extension<Arc<AppCore>>,
    headers: HeaderMap,
    Json(spec): Json<NewTask>,
) -> Result<Json<Task>, ApiError> {
    authorize_owner(&core, &headers)?;
    let task = core.queue.enqueue(spec)?;
    Ok(Json(scrub(task)))
}

async fn get_task(
    Extension(core): Extension<Arc<AppCore>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Task>, ApiError> {
    authorize_owner(&core, &headers)?;
    let task = core
        .queue
        .get_task(&task_id)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    let task = core.liveness.reconcile_task(task)?;
    Ok(Json(scrub(task)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    account_id: String,
}

async fn list_tasks(
    Extension(core): Extension<Arc<AppCore>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    authorize_owner(&core, &headers)?;
    let tasks = core
        .storage
        .tasks
        .list_by_account(&query.account_id)
        .map_err(|_| ApiError::internal())?;
    let mut reconciled = Vec::with_capacity(tasks.len());
    for task in tasks {
        reconciled.push(scrub(core.liveness.reconcile_task(task)?));
    }
    Ok(Json(reconciled))
}

/// Cancel a pending or in-progress task. Terminal tasks are rejected with
/// 409 `already_terminal`.
async fn cancel_task(
    Extension(core): Extension<Arc<AppCore>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Task>, ApiError> {
    authorize_owner(&core, &headers)?;
    let task = core.queue.cancel(&task_id)?;
    core.relay.notify_cancelled(&task).await;
    Ok(Json(scrub(task)))
}

#[derive(Debug, Deserialize)]
struct BulkDeleteRequest {
    account_id: String,
    task_ids: Vec<String>,
}

/// Delete tasks in bulk, scoped to the account. Foreign or unknown IDs are
/// skipped silently.
async fn bulk_delete(
    Extension(core): Extension<Arc<AppCore>>,
    headers: HeaderMap,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize_owner(&core, &headers)?;
    let deleted = core.queue.bulk_delete(&req.task_ids, &req.account_id)?;
    Ok(Json(json!({ "deleted": deleted })))
}
