//! Job lifecycle API handlers
//!
//! POST /jobs, GET /jobs/:job_id, POST /jobs/:job_id/convert,
//! POST /jobs/:job_id/cancel, GET /jobs/:job_id/status,
//! GET /jobs/:job_id/download

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;
use windband_common::human_size::format_bytes;

use crate::{
    api::extract::JobId,
    config::IntakeLimits,
    error::{ApiError, ApiResult},
    models::{InputFile, JobStatus},
    services::{archive_file_name, StatusView},
    AppState,
};

/// POST /jobs request
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub files: Vec<InputFile>,
}

/// POST /jobs response
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
}

/// POST /jobs/:job_id/convert response
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub job_id: Uuid,
    pub accepted: bool,
}

/// POST /jobs/:job_id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancel_requested: bool,
}

/// One input file as shown in the job detail
#[derive(Debug, Serialize)]
pub struct InputFileView {
    pub name: String,
    /// Upper-case extension, e.g. "MP3"
    pub file_type: String,
    pub size: u64,
    pub size_display: String,
}

/// GET /jobs/:job_id response
#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub created_at_display: String,
    pub input_files: Vec<InputFileView>,
    pub output_files: Vec<String>,
    pub percent: Option<u8>,
}

/// Keep the files that pass the intake rules
pub fn validate_input_files(files: Vec<InputFile>, limits: &IntakeLimits) -> Vec<InputFile> {
    files
        .into_iter()
        .filter(|file| {
            if file.display_name.trim().is_empty() {
                tracing::debug!("Dropping input file with empty name");
                return false;
            }
            let allowed = file
                .extension()
                .map(|ext| limits.allows_extension(&ext))
                .unwrap_or(false);
            if !allowed {
                tracing::debug!(file = %file.display_name, "Dropping input file with unsupported type");
                return false;
            }
            if file.size > limits.max_file_bytes {
                tracing::debug!(
                    file = %file.display_name,
                    size = file.size,
                    limit = limits.max_file_bytes,
                    "Dropping oversized input file"
                );
                return false;
            }
            true
        })
        .collect()
}

/// POST /jobs
///
/// Register validated uploads as a new job. Returns 201 with the job id.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    let submitted = request.files.len();
    let files = validate_input_files(request.files, &state.intake);
    if files.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "No valid files provided (allowed types: {}, max size: {})",
            state.intake.allowed_extensions.join(", "),
            format_bytes(state.intake.max_file_bytes)
        )));
    }

    let accepted = files.len();
    let job_id = state.store.create(files).await?;

    tracing::info!(job_id = %job_id, submitted, accepted, "Job created");

    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id })))
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    JobId(job_id): JobId,
) -> ApiResult<Json<JobDetailResponse>> {
    let job = state.store.get(job_id).await?;
    let view = state.reconciler.query(job_id).await?;

    let input_files = job
        .input_files
        .iter()
        .map(|file| InputFileView {
            name: file.display_name.clone(),
            file_type: file
                .extension()
                .map(|ext| ext.to_ascii_uppercase())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            size: file.size,
            size_display: format_bytes(file.size),
        })
        .collect();

    Ok(Json(JobDetailResponse {
        job_id,
        status: job.status,
        created_at: job.created_at,
        created_at_display: windband_common::time::format_local(job.created_at),
        input_files,
        output_files: job.output_file_names(),
        percent: view.percent,
    }))
}

/// POST /jobs/:job_id/convert
///
/// Start the conversion in the background. Returns 202 Accepted.
pub async fn start_conversion(
    State(state): State<AppState>,
    JobId(job_id): JobId,
) -> ApiResult<(StatusCode, Json<ConvertResponse>)> {
    // The handle is dropped; the pipeline task keeps running detached
    let handle = state.orchestrator.start(job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertResponse {
            job_id: handle.job_id(),
            accepted: true,
        }),
    ))
}

/// POST /jobs/:job_id/cancel
pub async fn cancel_conversion(
    State(state): State<AppState>,
    JobId(job_id): JobId,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    state.orchestrator.cancel(job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancel_requested: true,
        }),
    ))
}

/// GET /jobs/:job_id/status
pub async fn get_status(
    State(state): State<AppState>,
    JobId(job_id): JobId,
) -> ApiResult<Json<StatusView>> {
    let view = state.reconciler.query(job_id).await?;
    tracing::debug!(job_id = %job_id, status = ?view.status, percent = ?view.percent, "Status query");
    Ok(Json(view))
}

/// GET /jobs/:job_id/download
///
/// Package the result and stream the archive.
pub async fn download_result(
    State(state): State<AppState>,
    JobId(job_id): JobId,
) -> ApiResult<Response> {
    let archive_path = state.packager.package(job_id).await?;

    let file = tokio::fs::File::open(&archive_path).await.map_err(|e| {
        ApiError::Internal(format!(
            "Failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let body = Body::from_stream(ReaderStream::new(file));

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", archive_file_name(job_id)),
        ),
    ];

    Ok((headers, body).into_response())
}

/// Build job lifecycle routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/convert", post(start_conversion))
        .route("/jobs/:job_id/cancel", post(cancel_conversion))
        .route("/jobs/:job_id/status", get(get_status))
        .route("/jobs/:job_id/download", get(download_result))
}
