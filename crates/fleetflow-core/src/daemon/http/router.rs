//! API route tree.

use std::sync::Arc;

use axum::{Extension, Router};

use super::api;
use crate::AppCore;

pub fn build_router(core: Arc<AppCore>) -> Router {
    Router::new()
        .nest("/api/agents", api::agents::router())
        .nest("/api/tasks", api::tasks::router())
        .nest("/api/relay", api::relay::router())
        .layer(Extension(core))
}
