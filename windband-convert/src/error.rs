//! Error types for windband-convert
//!
//! `JobError` is what the job lifecycle components return; callers branch on
//! the variant. `ApiError` is the HTTP-facing wrapper that renders the JSON
//! error body and status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Job lifecycle error
#[derive(Debug, Error, Clone, PartialEq)]
pub enum JobError {
    /// No job record with this id
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Operation not valid for the job's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Mutation not allowed (result already attached, entry already terminal)
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A non-terminal progress entry already exists for this job
    #[error("Conversion already active for job {0}")]
    AlreadyActive(Uuid),

    /// Progress went backwards
    #[error("Out-of-order progress update for job {job_id}: {current}% -> {requested}%")]
    OutOfOrderUpdate {
        job_id: Uuid,
        current: u8,
        requested: u8,
    },

    /// Job exists but has no result to package
    #[error("Result not ready for job {0}")]
    NotReady(Uuid),

    /// Durable storage could not be read or written
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Archive could not be produced
    #[error("Packaging failure: {0}")]
    PackagingFailure(String),

    /// The conversion engine reported an error
    #[error("Conversion stage '{stage}' failed: {message}")]
    ConversionStageFailure { stage: String, message: String },
}

impl JobError {
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        JobError::StorageFailure(format!("{}: {}", context, err))
    }

    pub fn packaging(context: &str, err: impl std::fmt::Display) -> Self {
        JobError::PackagingFailure(format!("{}: {}", context, err))
    }
}

/// Result type for job lifecycle operations
pub type JobResult<T> = Result<T, JobError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Job lifecycle error
    #[error(transparent)]
    Job(#[from] JobError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Job(ref err) => {
                let (status, code) = job_error_status(err);
                (status, code, err.to_string())
            }
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

fn job_error_status(err: &JobError) -> (StatusCode, &'static str) {
    match err {
        JobError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        JobError::NotReady(_) => (StatusCode::NOT_FOUND, "NOT_READY"),
        JobError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
        JobError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        JobError::AlreadyActive(_) => (StatusCode::CONFLICT, "ALREADY_ACTIVE"),
        JobError::OutOfOrderUpdate { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "OUT_OF_ORDER_UPDATE"),
        JobError::StorageFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE"),
        JobError::PackagingFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PACKAGING_FAILURE"),
        JobError::ConversionStageFailure { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "CONVERSION_FAILURE")
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
