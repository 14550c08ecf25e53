//! Request extractors that report failures in the API error format

use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use uuid::Uuid;

use crate::error::ApiError;

/// `:job_id` path segment parsed as a UUID
///
/// A missing or malformed id is a `BAD_REQUEST` with the usual JSON error
/// body instead of axum's plain-text rejection.
#[derive(Debug, Clone, Copy)]
pub struct JobId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for JobId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

        windband_common::uuid_utils::parse(&raw)
            .map(JobId)
            .map_err(|_| ApiError::BadRequest(format!("Invalid job id: {}", raw)))
    }
}
