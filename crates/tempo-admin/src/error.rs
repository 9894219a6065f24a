//! Error types for the admin API.
//!
//! [`AdminError`] unifies all failure modes into a single enum that can be
//! converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tempo_core::{EngineError, ScheduleError};

/// Errors that can occur in the admin API layer.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The requested event does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was well-formed JSON but semantically invalid.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The engine is in a state that cannot accept the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ScheduleError> for AdminError {
    fn from(err: ScheduleError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<EngineError> for AdminError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Clock { .. } | EngineError::Schedule { .. } => {
                Self::BadRequest(err.to_string())
            }
            EngineError::Stopped | EngineError::ConcurrentTick => Self::Conflict(err.to_string()),
            EngineError::NoRuntime | EngineError::TickTask { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
