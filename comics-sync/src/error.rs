//! Error types for comics-sync
//!
//! `SyncError` is what a trigger cycle or interactive write can fail with;
//! `ApiError` maps everything onto a JSON error body and status code.

use crate::media::MediaError;
use crate::store::RemoteError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use comics_common::records::RecordError;
use comics_common::SnapshotError;
use serde_json::json;
use thiserror::Error;

/// Failure of one reconciliation cycle or interactive write
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The write worker has stopped accepting commands
    #[error("sync worker unavailable")]
    WorkerStopped,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., duplicate title
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream store or media host failure (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Feature not configured (503)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RemoteError> for ApiError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound(msg) => ApiError::NotFound(msg),
            RemoteError::ConstraintViolation(msg) => ApiError::Conflict(msg),
            RemoteError::Unreachable(msg) => ApiError::Upstream(msg),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Remote(e) => e.into(),
            SyncError::Snapshot(e @ SnapshotError::InvalidFormat(_)) => {
                ApiError::BadRequest(e.to_string())
            }
            SyncError::Snapshot(e) => ApiError::Internal(e.to_string()),
            SyncError::WorkerStopped => {
                ApiError::Internal("sync worker unavailable".to_string())
            }
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(e: RecordError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Io(e) => ApiError::Io(e),
            MediaError::NotConfigured => {
                ApiError::Unavailable("media host not configured".to_string())
            }
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
