//! Conversion orchestrator
//!
//! Drives a job through `uploaded → processing → converted`:
//!
//! 1. `start` checks the record, registers a progress entry, persists
//!    `processing`, and spawns the pipeline on its own task.
//! 2. The pipeline runs the engine's stages in order on the blocking pool and
//!    reports cumulative progress after each one.
//! 3. On success the job leaves the set of cancellable runs, then the
//!    analysis result and the `converted` status are written together; only
//!    then is the progress entry completed.
//!
//! A cancel request is accepted exactly while the job is registered as a
//! cancellable run: from the moment `processing` is persisted until every
//! stage has finished. An accepted cancel therefore always ends the run as
//! cancelled, and a refused one never interrupts it.
//!
//! Nothing is persisted until every stage has succeeded, so a failed,
//! cancelled, or timed-out run leaves the record at `processing` with no
//! result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{JobError, JobResult};
use crate::models::{AnalysisResult, Job, JobStatus, Track};
use crate::services::engine::{ConversionEngine, StageContext};
use crate::services::progress_tracker::ProgressTracker;
use crate::store::JobStore;
use crate::utils::retry_on_storage_failure;

/// Attempts for the result-persisting write (one retry)
const PERSIST_ATTEMPTS: u32 = 2;

pub const CANCELLED_MESSAGE: &str = "Conversion cancelled";

/// How a background conversion ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Converted { track_count: usize },
    Failed { message: String },
    Cancelled,
    TimedOut,
}

/// Handle to a spawned conversion
pub struct ConversionHandle {
    job_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<JobOutcome>,
}

impl ConversionHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Ask the pipeline to stop before its next stage
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the background task to finish
    pub async fn wait(self) -> JobOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed {
                message: format!("conversion task aborted: {}", e),
            },
        }
    }
}

enum PipelineError {
    Cancelled,
    Failed(JobError),
}

#[derive(Clone)]
pub struct ConversionOrchestrator {
    store: Arc<JobStore>,
    tracker: ProgressTracker,
    engine: Arc<dyn ConversionEngine>,
    outputs_dir: PathBuf,
    job_timeout: Option<Duration>,
    /// Runs that still accept cancellation
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Makes check-status / begin / persist-processing / register one step
    start_lock: Arc<Mutex<()>>,
}

impl ConversionOrchestrator {
    pub fn new(
        store: Arc<JobStore>,
        tracker: ProgressTracker,
        engine: Arc<dyn ConversionEngine>,
        outputs_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            tracker,
            engine,
            outputs_dir,
            job_timeout: None,
            active: Arc::new(RwLock::new(HashMap::new())),
            start_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Force jobs running longer than `timeout` into the error state
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Start converting an `uploaded` job in the background
    ///
    /// Returns as soon as the task is spawned.
    pub async fn start(&self, job_id: Uuid) -> JobResult<ConversionHandle> {
        let (job, cancel) = {
            let _guard = self.start_lock.lock().await;

            let job = self.store.get(job_id).await?;
            if job.status != JobStatus::Uploaded {
                return Err(JobError::InvalidState(format!(
                    "job {} is {:?}; only uploaded jobs can be converted",
                    job_id, job.status
                )));
            }

            match self.tracker.begin(job_id).await {
                Ok(()) => {}
                Err(JobError::AlreadyActive(_)) => {
                    return Err(JobError::InvalidState(format!(
                        "conversion already running for job {}",
                        job_id
                    )));
                }
                Err(e) => return Err(e),
            }

            if let Err(e) = self.store.update_status(job_id, JobStatus::Processing).await {
                self.tracker.discard(job_id).await;
                return Err(e);
            }

            // Registered before the lock is released: a cancel that observes
            // `processing` always finds the token
            let cancel = CancellationToken::new();
            self.active.write().await.insert(job_id, cancel.clone());

            (job, cancel)
        };

        let this = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome = this.run_job(job, token).await;
            this.active.write().await.remove(&job_id);
            outcome
        });

        info!(job_id = %job_id, engine = self.engine.name(), "Conversion started");

        Ok(ConversionHandle {
            job_id,
            cancel,
            handle,
        })
    }

    /// Request cancellation of a running conversion
    ///
    /// Succeeds only while the run can still be stopped; once its stages have
    /// finished the result is committed and the request is refused.
    pub async fn cancel(&self, job_id: Uuid) -> JobResult<()> {
        let registered = {
            let _guard = self.start_lock.lock().await;
            let active = self.active.read().await;
            // Cancelled while the map is held so the commit in `run_job`
            // either sees the flag or the request sees no token
            match active.get(&job_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        };

        if registered {
            info!(job_id = %job_id, "Conversion cancellation requested");
            return Ok(());
        }

        // Distinguish unknown jobs from jobs that are simply idle
        self.store.get(job_id).await?;
        Err(JobError::InvalidState(format!(
            "job {} has no running conversion",
            job_id
        )))
    }

    /// Jobs whose stages are still running
    pub async fn active_jobs(&self) -> Vec<Uuid> {
        self.active.read().await.keys().copied().collect()
    }

    async fn run_job(&self, job: Job, cancel: CancellationToken) -> JobOutcome {
        let job_id = job.job_id;
        let started = Instant::now();

        let pipeline = self.run_stages(&job, &cancel);
        let stage_result = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, pipeline).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    let message = format!("Conversion timed out after {:?}", limit);
                    error!(job_id = %job_id, timeout = ?limit, "Conversion watchdog expired");
                    self.record_failure(job_id, &message).await;
                    return JobOutcome::TimedOut;
                }
            },
            None => pipeline.await,
        };

        // Commit point: from here on cancel requests are refused
        self.active.write().await.remove(&job_id);

        let tracks = match stage_result {
            Ok(tracks) if !cancel.is_cancelled() => tracks,
            Ok(_) | Err(PipelineError::Cancelled) => {
                info!(job_id = %job_id, "Conversion cancelled");
                self.record_failure(job_id, CANCELLED_MESSAGE).await;
                return JobOutcome::Cancelled;
            }
            Err(PipelineError::Failed(err)) => {
                let message = err.to_string();
                error!(job_id = %job_id, error = %message, "Conversion failed");
                self.record_failure(job_id, &message).await;
                return JobOutcome::Failed { message };
            }
        };

        match self.persist_result(job_id, tracks).await {
            Ok(track_count) => {
                if let Err(e) = self.tracker.complete(job_id).await {
                    warn!(job_id = %job_id, error = %e, "Could not mark progress completed");
                }
                info!(
                    job_id = %job_id,
                    track_count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Conversion completed"
                );
                JobOutcome::Converted { track_count }
            }
            Err(e) => {
                let message = format!("Failed to store conversion result: {}", e);
                error!(job_id = %job_id, error = %e, "Result persistence failed");
                self.record_failure(job_id, &message).await;
                JobOutcome::Failed { message }
            }
        }
    }

    async fn run_stages(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Vec<Track>, PipelineError> {
        let job_id = job.job_id;

        let stages = self.engine.plan(job).map_err(|e| {
            PipelineError::Failed(JobError::ConversionStageFailure {
                stage: "planning".to_string(),
                message: e.to_string(),
            })
        })?;

        let output_dir = self.outputs_dir.join(job_id.to_string());
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| PipelineError::Failed(JobError::storage("create output directory", e)))?;

        let stage_count = stages.len();
        let mut ctx = StageContext::new(job, output_dir, cancel.clone());

        for (index, stage) in stages.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let label = stage.label.clone();
            let percent = stage.percent;
            debug!(
                job_id = %job_id,
                stage = %label,
                index = index + 1,
                total = stage_count,
                "Running stage"
            );

            let work = tokio::task::spawn_blocking(move || {
                let result = stage.run(&mut ctx);
                (ctx, result)
            });

            // A cancelled run stops waiting; the blocking stage finishes on its own
            // and its output is discarded.
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                joined = work => joined,
            };

            let (returned, result) = joined.map_err(|e| {
                PipelineError::Failed(JobError::ConversionStageFailure {
                    stage: label.clone(),
                    message: format!("stage task panicked: {}", e),
                })
            })?;
            ctx = returned;

            result.map_err(|e| {
                PipelineError::Failed(JobError::ConversionStageFailure {
                    stage: label.clone(),
                    message: e.message().to_string(),
                })
            })?;

            match self.tracker.update(job_id, percent, &label).await {
                Ok(()) => {}
                Err(e @ JobError::OutOfOrderUpdate { .. }) => {
                    warn!(job_id = %job_id, stage = %label, error = %e, "Ignoring out-of-order progress report");
                }
                Err(e) => {
                    warn!(job_id = %job_id, stage = %label, error = %e, "Progress update rejected");
                }
            }
        }

        Ok(ctx.into_tracks())
    }

    async fn persist_result(&self, job_id: Uuid, tracks: Vec<Track>) -> JobResult<usize> {
        let result = AnalysisResult {
            job_id,
            completed_at: Utc::now(),
            tracks,
        };
        let track_count = result.tracks.len();

        retry_on_storage_failure("complete", PERSIST_ATTEMPTS, || {
            self.store.complete(job_id, result.clone())
        })
        .await?;

        Ok(track_count)
    }

    async fn record_failure(&self, job_id: Uuid, message: &str) {
        if let Err(e) = self.tracker.fail(job_id, message).await {
            warn!(job_id = %job_id, error = %e, "Could not record conversion failure");
        }
    }
}
