//! Unified API error type.
//!
//! Every handler returns `Result<T, ApiError>`; the [`IntoResponse`]
//! implementation renders the stable `{error, code, details?}` body with the
//! matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error body shape shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("invalid task type")]
    InvalidTaskType,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("invalid timeout format")]
    InvalidTimeout,
    #[error("invalid process_at format")]
    InvalidProcessAt,
    #[error("invalid unique format")]
    InvalidUnique,
    #[error("task not found")]
    TaskNotFound,
    #[error("task already exists")]
    TaskAlreadyExists,
    #[error("failed to cancel task: {0}")]
    CancelFailed(String),
    #[error("failed to delete task: {0}")]
    DeleteFailed(String),
    #[error("failed to get queue stats: {0}")]
    StatsFailed(String),
    #[error("no progress found for this task")]
    ProgressNotFound,
    #[error("failed to get progress: {0}")]
    ProgressFetch(String),
    #[error("failed to get progress history: {0}")]
    ProgressHistory(String),
    #[error("failed to get stream info: {0}")]
    StreamInfo(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::InvalidTaskType => "INVALID_TASK_TYPE",
            ApiError::InvalidPayload => "INVALID_PAYLOAD",
            ApiError::InvalidTimeout => "INVALID_TIMEOUT",
            ApiError::InvalidProcessAt => "INVALID_PROCESS_AT",
            ApiError::InvalidUnique => "INVALID_UNIQUE",
            ApiError::TaskNotFound => "TASK_NOT_FOUND",
            ApiError::TaskAlreadyExists => "TASK_ALREADY_EXISTS",
            ApiError::CancelFailed(_) => "CANCEL_FAILED",
            ApiError::DeleteFailed(_) => "DELETE_FAILED",
            ApiError::StatsFailed(_) => "STATS_FAILED",
            ApiError::ProgressNotFound => "PROGRESS_NOT_FOUND",
            ApiError::ProgressFetch(_) => "PROGRESS_FETCH_ERROR",
            ApiError::ProgressHistory(_) => "PROGRESS_HISTORY_ERROR",
            ApiError::StreamInfo(_) => "STREAM_INFO_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_)
            | ApiError::InvalidTaskType
            | ApiError::InvalidPayload
            | ApiError::InvalidTimeout
            | ApiError::InvalidProcessAt
            | ApiError::InvalidUnique => StatusCode::BAD_REQUEST,
            ApiError::TaskNotFound | ApiError::ProgressNotFound => StatusCode::NOT_FOUND,
            ApiError::TaskAlreadyExists => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_are_upper_snake() {
        let errors = [
            ApiError::InvalidRequest("x".into()),
            ApiError::TaskNotFound,
            ApiError::TaskAlreadyExists,
            ApiError::CancelFailed("x".into()),
            ApiError::StatsFailed("x".into()),
            ApiError::ProgressHistory("x".into()),
        ];
        for e in errors {
            let code = e.code();
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "{code} is not UPPER_SNAKE"
            );
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::TaskNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::TaskAlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::InvalidPayload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::ProgressNotFound.status(), StatusCode::NOT_FOUND);
    }
}
