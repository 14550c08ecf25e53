//! Status reconciliation
//!
//! A job's visible status is composed at read time: live progress wins, and
//! once the progress entry has expired (or never existed in this process) the
//! durable record is the source of truth.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobResult;
use crate::models::{JobStatus, ProgressStatus};
use crate::services::progress_tracker::ProgressTracker;
use crate::store::JobStore;

/// Status as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewStatus {
    Waiting,
    Processing,
    Completed,
    Error,
}

/// Composed status of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub job_id: Uuid,
    pub status: ViewStatus,
    /// `None` when progress is unknown (record says processing, no live entry)
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub struct StatusReconciler {
    store: Arc<JobStore>,
    tracker: ProgressTracker,
}

impl StatusReconciler {
    pub fn new(store: Arc<JobStore>, tracker: ProgressTracker) -> Self {
        Self { store, tracker }
    }

    /// Current status of `job_id`; `NotFound` only when no record exists
    pub async fn query(&self, job_id: Uuid) -> JobResult<StatusView> {
        if let Some(entry) = self.tracker.get(job_id).await {
            let status = match entry.status {
                ProgressStatus::Processing => ViewStatus::Processing,
                ProgressStatus::Completed => ViewStatus::Completed,
                ProgressStatus::Error => ViewStatus::Error,
            };
            return Ok(StatusView {
                job_id,
                status,
                percent: Some(entry.percent),
                stage_label: Some(entry.stage_label),
                error_message: entry.error_message,
            });
        }

        let job = self.store.get(job_id).await?;
        let (status, percent) = match job.status {
            JobStatus::Uploaded => (ViewStatus::Waiting, Some(0)),
            JobStatus::Converted => (ViewStatus::Completed, Some(100)),
            JobStatus::Processing | JobStatus::Error => (ViewStatus::Processing, None),
        };

        Ok(StatusView {
            job_id,
            status,
            percent,
            stage_label: None,
            error_message: None,
        })
    }
}
