//! HTTP error type with machine-readable codes.
//!
//! Auth failures are opaque: whatever the internal cause, the wire sees the
//! same `auth_failed` body. Internal errors are logged server-side and never
//! leak their text to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::CoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "auth_failed",
            "Authentication failed",
        )
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{resource} not found"),
        )
    }

    pub fn already_terminal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "already_terminal", message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "Internal server error",
        )
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Auth => Self::unauthorized(),
            CoreError::NotFound(resource) => Self::not_found(resource),
            CoreError::IllegalTransition { .. } => Self::already_terminal(err.to_string()),
            CoreError::Invalid(message) => Self::bad_request(message),
            CoreError::CredentialUnavailable | CoreError::Storage(_) => {
                error!("Internal error: {err}");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}
