//! Job record store
//!
//! One directory per job under the store root, holding `job.json`: the job
//! fields plus the nested analysis result once attached. All mutations are
//! serialized through a single write lock and published atomically.

mod atomic;

pub use atomic::write_json_atomic;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{JobError, JobResult};
use crate::models::{AnalysisResult, InputFile, Job, JobStatus};

const RECORD_FILE: &str = "job.json";

/// Durable store of job records
pub struct JobStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    /// Writes still to be failed on purpose
    #[cfg(test)]
    failing_writes: AtomicU32,
}

impl JobStore {
    /// Store rooted at `root` (typically `<root folder>/jobs`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
            #[cfg(test)]
            failing_writes: AtomicU32::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn record_path(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(RECORD_FILE)
    }

    /// Persist a new job in `uploaded` state and return its id
    pub async fn create(&self, input_files: Vec<InputFile>) -> JobResult<Uuid> {
        let job_id = windband_common::uuid_utils::generate();
        let job = Job::new(job_id, input_files);

        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(self.job_dir(job_id))
            .await
            .map_err(|e| JobError::storage("create job directory", e))?;
        self.write(&job).await?;

        info!(
            job_id = %job_id,
            files = job.input_files.len(),
            "Job record created"
        );
        Ok(job_id)
    }

    /// Load a job record
    pub async fn get(&self, job_id: Uuid) -> JobResult<Job> {
        let path = self.record_path(job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(JobError::NotFound(job_id)),
            Err(e) => return Err(JobError::storage("read job record", e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| JobError::storage("parse job record", e))
    }

    /// Change the persisted status
    pub async fn update_status(&self, job_id: Uuid, status: JobStatus) -> JobResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut job = self.get(job_id).await?;
        let previous = job.status;
        job.status = status;
        self.write(&job).await?;

        debug!(job_id = %job_id, from = ?previous, to = ?status, "Job status updated");
        Ok(())
    }

    /// Attach the analysis result; a job's result can be set only once
    pub async fn attach_result(&self, job_id: Uuid, result: AnalysisResult) -> JobResult<()> {
        if result.job_id != job_id {
            return Err(JobError::InvalidTransition(format!(
                "result for job {} cannot be attached to job {}",
                result.job_id, job_id
            )));
        }

        let _guard = self.write_lock.lock().await;

        let mut job = self.get(job_id).await?;
        if job.result.is_some() {
            return Err(JobError::InvalidTransition(format!(
                "job {} already has a result",
                job_id
            )));
        }

        let track_count = result.tracks.len();
        job.result = Some(result);
        self.write(&job).await?;

        info!(job_id = %job_id, tracks = track_count, "Analysis result attached");
        Ok(())
    }

    /// Attach the result and mark the job `converted` in a single write
    ///
    /// Either both fields change or neither does, so a record never shows a
    /// result without `converted` or `converted` without a result.
    pub async fn complete(&self, job_id: Uuid, result: AnalysisResult) -> JobResult<()> {
        if result.job_id != job_id {
            return Err(JobError::InvalidTransition(format!(
                "result for job {} cannot complete job {}",
                result.job_id, job_id
            )));
        }

        let _guard = self.write_lock.lock().await;

        let mut job = self.get(job_id).await?;
        if job.result.is_some() {
            return Err(JobError::InvalidTransition(format!(
                "job {} already has a result",
                job_id
            )));
        }

        let previous = job.status;
        let track_count = result.tracks.len();
        job.result = Some(result);
        job.status = JobStatus::Converted;
        self.write(&job).await?;

        info!(job_id = %job_id, from = ?previous, tracks = track_count, "Job converted");
        Ok(())
    }

    /// Make the next `count` record writes fail with a storage error
    #[cfg(test)]
    pub(crate) fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    async fn write(&self, job: &Job) -> JobResult<()> {
        #[cfg(test)]
        if self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(JobError::storage("write job record", "injected failure"));
        }

        write_json_atomic(&self.record_path(job.job_id), job)
            .await
            .map_err(|e| JobError::storage("write job record", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputKind, Track};
    use chrono::Utc;

    fn sample_files() -> Vec<InputFile> {
        vec![InputFile {
            display_name: "march.mid".to_string(),
            stored_path: PathBuf::from("/uploads/march.mid"),
            size: 2048,
        }]
    }

    fn sample_result(job_id: Uuid, label: &str) -> AnalysisResult {
        AnalysisResult {
            job_id,
            completed_at: Utc::now(),
            tracks: vec![Track::new(label, "Melody", 9.0, &[OutputKind::Notation])],
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());

        let job_id = store.create(sample_files()).await.unwrap();
        let job = store.get(job_id).await.unwrap();

        assert_eq!(job.job_id, job_id);
        assert_eq!(job.status, JobStatus::Uploaded);
        assert_eq!(job.input_files, sample_files());
        assert!(job.result.is_none());
        assert!(dir.path().join(job_id.to_string()).join("job.json").is_file());
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let id = Uuid::new_v4();

        assert_eq!(store.get(id).await, Err(JobError::NotFound(id)));
        assert_eq!(
            store.update_status(id, JobStatus::Processing).await,
            Err(JobError::NotFound(id))
        );
        assert_eq!(
            store.attach_result(id, sample_result(id, "Horn")).await,
            Err(JobError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn test_update_status_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();

        store.update_status(job_id, JobStatus::Processing).await.unwrap();

        // A fresh store over the same directory sees the change (restart)
        let reopened = JobStore::new(dir.path());
        assert_eq!(reopened.get(job_id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_attach_result_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();

        let first = sample_result(job_id, "Trumpet1");
        store.attach_result(job_id, first.clone()).await.unwrap();

        let second = store.attach_result(job_id, sample_result(job_id, "Tuba")).await;
        assert!(matches!(second, Err(JobError::InvalidTransition(_))));

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.result, Some(first));
    }

    #[tokio::test]
    async fn test_attach_result_rejects_foreign_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();

        let result = store.attach_result(job_id, sample_result(Uuid::new_v4(), "Horn")).await;
        assert!(matches!(result, Err(JobError::InvalidTransition(_))));
        assert!(store.get(job_id).await.unwrap().result.is_none());
    }

    #[tokio::test]
    async fn test_complete_sets_result_and_status_together() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();
        store.update_status(job_id, JobStatus::Processing).await.unwrap();

        let result = sample_result(job_id, "Euphonium");
        store.complete(job_id, result.clone()).await.unwrap();

        let reopened = JobStore::new(dir.path());
        let job = reopened.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Converted);
        assert_eq!(job.result, Some(result));
    }

    #[tokio::test]
    async fn test_failed_complete_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();
        store.update_status(job_id, JobStatus::Processing).await.unwrap();

        store.fail_next_writes(1);
        let failed = store.complete(job_id, sample_result(job_id, "Horn")).await;
        assert!(matches!(failed, Err(JobError::StorageFailure(_))));

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.result.is_none());

        // The injected failure is spent; a retry goes through
        store.complete(job_id, sample_result(job_id, "Horn")).await.unwrap();
        assert_eq!(store.get(job_id).await.unwrap().status, JobStatus::Converted);
    }

    #[tokio::test]
    async fn test_complete_rejects_foreign_or_second_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();

        let foreign = store.complete(job_id, sample_result(Uuid::new_v4(), "Horn")).await;
        assert!(matches!(foreign, Err(JobError::InvalidTransition(_))));
        assert_eq!(store.get(job_id).await.unwrap().status, JobStatus::Uploaded);

        let first = sample_result(job_id, "Trumpet1");
        store.complete(job_id, first.clone()).await.unwrap();
        let second = store.complete(job_id, sample_result(job_id, "Tuba")).await;
        assert!(matches!(second, Err(JobError::InvalidTransition(_))));
        assert_eq!(store.get(job_id).await.unwrap().result, Some(first));
    }

    #[tokio::test]
    async fn test_create_on_unwritable_root_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = JobStore::new(&blocker);
        let result = store.create(sample_files()).await;
        assert!(matches!(result, Err(JobError::StorageFailure(_))));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job_id = store.create(sample_files()).await.unwrap();
        std::fs::write(dir.path().join(job_id.to_string()).join("job.json"), b"{").unwrap();

        assert!(matches!(store.get(job_id).await, Err(JobError::StorageFailure(_))));
    }

    #[tokio::test]
    async fn test_concurrent_status_updates_never_expose_partial_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JobStore::new(dir.path()));
        let job_id = store.create(sample_files()).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let status = if i % 2 == 0 {
                        JobStatus::Processing
                    } else {
                        JobStatus::Uploaded
                    };
                    store.update_status(job_id, status).await.unwrap();
                }
            })
        };

        for _ in 0..50 {
            // Every read parses: no torn writes
            store.get(job_id).await.unwrap();
            tokio::task::yield_now().await;
        }

        writer.await.unwrap();
    }
}
