//! Service-specific error types

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of one whole dispatch run (CLI or scheduled job).
///
/// Per-account failures are not errors; they live in the `DispatchReport`.
#[derive(Error, Debug)]
pub enum DispatchRunError {
    #[error("loading credential store: {0}")]
    Store(#[from] credential_store::Error),

    #[error(transparent)]
    Dispatch(#[from] batch_dispatch::Error),
}

/// Admin API errors, rendered as `{"error": "..."}` JSON.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<job_scheduler::Error> for ApiError {
    fn from(e: job_scheduler::Error) -> Self {
        match e {
            job_scheduler::Error::NotFound(_) => ApiError::NotFound(e.to_string()),
            job_scheduler::Error::AlreadyFinished { .. } => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid request body: {}", e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": self.to_string() }).to_string(),
        )
            .into_response()
    }
}
