//! In-memory progress tracker
//!
//! Holds one [`ProgressEntry`] per running or recently finished conversion.
//! Entries are process-lifetime only: after a terminal transition an entry
//! stays readable for the retention window and is then dropped, at which point
//! status queries fall back to the durable job record.
//!
//! The tracker is cheap to clone; clones share the same map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windband_common::events::{EventBus, ProgressEvent};

use crate::error::{JobError, JobResult};
use crate::models::{ProgressEntry, ProgressStatus};

/// How long terminal entries remain readable unless configured otherwise
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

struct TrackedEntry {
    entry: ProgressEntry,
    /// Distinguishes successive runs of the same job so a stale removal
    /// timer never deletes a newer entry
    generation: u64,
}

#[derive(Clone)]
pub struct ProgressTracker {
    entries: Arc<RwLock<HashMap<Uuid, TrackedEntry>>>,
    next_generation: Arc<AtomicU64>,
    retention: Duration,
    event_bus: EventBus,
}

impl ProgressTracker {
    pub fn new(retention: Duration, event_bus: EventBus) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            retention,
            event_bus,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Register a conversion at 0%
    ///
    /// Fails with `AlreadyActive` while a non-terminal entry exists. A terminal
    /// entry still inside its retention window is replaced.
    pub async fn begin(&self, job_id: Uuid) -> JobResult<()> {
        {
            let mut entries = self.entries.write().await;
            if let Some(existing) = entries.get(&job_id) {
                if !existing.entry.is_terminal() {
                    return Err(JobError::AlreadyActive(job_id));
                }
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            entries.insert(
                job_id,
                TrackedEntry {
                    entry: ProgressEntry::started(),
                    generation,
                },
            );
        }

        debug!(job_id = %job_id, "Progress entry created");
        self.event_bus.emit_lossy(ProgressEvent::ConversionStarted {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record cumulative progress; `percent` may never go down
    pub async fn update(&self, job_id: Uuid, percent: u8, stage_label: &str) -> JobResult<()> {
        let percent = percent.min(100);

        {
            let mut entries = self.entries.write().await;
            let tracked = entries.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
            let entry = &mut tracked.entry;

            if entry.is_terminal() {
                return Err(JobError::InvalidTransition(format!(
                    "progress for job {} is already {:?}",
                    job_id, entry.status
                )));
            }
            if percent < entry.percent {
                return Err(JobError::OutOfOrderUpdate {
                    job_id,
                    current: entry.percent,
                    requested: percent,
                });
            }

            entry.percent = percent;
            entry.stage_label = stage_label.to_string();
            entry.updated_at = Utc::now();
        }

        debug!(job_id = %job_id, percent, stage = stage_label, "Progress updated");
        self.event_bus.emit_lossy(ProgressEvent::ConversionProgress {
            job_id,
            percent,
            stage_label: stage_label.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Mark the conversion finished and schedule the entry's removal
    pub async fn complete(&self, job_id: Uuid) -> JobResult<()> {
        self.finish(job_id, ProgressStatus::Completed, None).await?;

        info!(job_id = %job_id, "Conversion progress completed");
        self.event_bus.emit_lossy(ProgressEvent::ConversionCompleted {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Mark the conversion failed and schedule the entry's removal
    pub async fn fail(&self, job_id: Uuid, error_message: &str) -> JobResult<()> {
        self.finish(job_id, ProgressStatus::Error, Some(error_message.to_string()))
            .await?;

        warn!(job_id = %job_id, error = error_message, "Conversion progress failed");
        self.event_bus.emit_lossy(ProgressEvent::ConversionFailed {
            job_id,
            error_message: error_message.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: ProgressStatus,
        error_message: Option<String>,
    ) -> JobResult<()> {
        let generation = {
            let mut entries = self.entries.write().await;
            let tracked = entries.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
            let entry = &mut tracked.entry;

            if entry.is_terminal() {
                return Err(JobError::InvalidTransition(format!(
                    "progress for job {} is already {:?}",
                    job_id, entry.status
                )));
            }

            entry.status = status;
            entry.updated_at = Utc::now();
            match status {
                ProgressStatus::Completed => {
                    entry.percent = 100;
                    entry.stage_label = "Completed".to_string();
                }
                ProgressStatus::Error => entry.error_message = error_message,
                ProgressStatus::Processing => {}
            }

            tracked.generation
        };

        self.schedule_removal(job_id, generation);
        Ok(())
    }

    fn schedule_removal(&self, job_id: Uuid, generation: u64) {
        let entries = Arc::clone(&self.entries);
        let retention = self.retention;

        tokio::spawn(async move {
            tokio::time::sleep(retention).await;

            let mut entries = entries.write().await;
            if entries.get(&job_id).map(|t| t.generation) == Some(generation) {
                entries.remove(&job_id);
                debug!(job_id = %job_id, "Progress entry expired");
            }
        });
    }

    /// Current entry, if any. Absence means "ask the durable record".
    pub async fn get(&self, job_id: Uuid) -> Option<ProgressEntry> {
        self.entries
            .read()
            .await
            .get(&job_id)
            .map(|tracked| tracked.entry.clone())
    }

    /// Drop an entry immediately (rollback of a `begin` that could not be persisted)
    pub async fn discard(&self, job_id: Uuid) {
        self.entries.write().await.remove(&job_id);
    }

    /// Number of entries currently held (live and retained)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
