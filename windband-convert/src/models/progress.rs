//! Ephemeral progress state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live conversion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Error,
}

/// Progress of one running (or recently finished) conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub status: ProgressStatus,
    /// 0..=100, never decreases while processing
    pub percent: u8,
    pub stage_label: String,
    /// Only set when `status == Error`
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn started() -> Self {
        Self {
            status: ProgressStatus::Processing,
            percent: 0,
            stage_label: "Queued".to_string(),
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ProgressStatus::Completed | ProgressStatus::Error)
    }
}
