//! Inbound progress relay endpoint.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};

use super::bearer_claims;
use crate::daemon::http::error::ApiError;
use crate::models::ProgressUpdate;
use crate::AppCore;

pub fn router() -> Router {
    Router::new().route("/progress", post(progress))
}

/// Accept a progress/completion event from an agent. Bearer token only;
/// illegal transitions come back `{ok: true}` because dropping them is the
/// designed behavior, not a failure the agent should retry.
async fn progress(
    Extension(core): Extension<Arc<AppCore>>,
    headers: HeaderMap,
    Json(update): Json<ProgressUpdate>,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims(&core, &headers)?;
    let disposition = core.relay.handle(update, &claims).await?;
    Ok(Json(json!({ "ok": true, "disposition": disposition })))
}
