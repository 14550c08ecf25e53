//! Conversion engine contract
//!
//! The orchestrator knows nothing about audio or MIDI. An engine hands it an
//! ordered list of [`Stage`]s, each with a cumulative percent and a label; the
//! orchestrator runs them one by one on the blocking pool, reports progress
//! after each, and turns the tracks collected in the [`StageContext`] into the
//! job's analysis result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{InputFile, Job, OutputKind, Track};

/// Error reported by a stage; the message ends up in the job's progress entry
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct StageError(String);

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

type StageFn = Box<dyn FnOnce(&mut StageContext) -> Result<(), StageError> + Send + 'static>;

/// One unit of conversion work
pub struct Stage {
    pub label: String,
    /// Cumulative progress once this stage has finished
    pub percent: u8,
    work: StageFn,
}

impl Stage {
    pub fn new<F>(label: impl Into<String>, percent: u8, work: F) -> Self
    where
        F: FnOnce(&mut StageContext) -> Result<(), StageError> + Send + 'static,
    {
        Self {
            label: label.into(),
            percent,
            work: Box::new(work),
        }
    }

    /// Run the stage body. Blocking; call from a blocking-capable thread.
    pub fn run(self, ctx: &mut StageContext) -> Result<(), StageError> {
        (self.work)(ctx)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("label", &self.label)
            .field("percent", &self.percent)
            .finish_non_exhaustive()
    }
}

/// State threaded through a job's stages
pub struct StageContext {
    job_id: Uuid,
    input_files: Vec<InputFile>,
    output_dir: PathBuf,
    tracks: Vec<Track>,
    cancel: CancellationToken,
}

impl StageContext {
    pub fn new(job: &Job, output_dir: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            job_id: job.job_id,
            input_files: job.input_files.clone(),
            output_dir,
            tracks: Vec::new(),
            cancel,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn input_files(&self) -> &[InputFile] {
        &self.input_files
    }

    /// Where artifacts for this job should be written
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn push_track(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }

    /// Long-running stages may poll this to stop early
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Pluggable conversion backend
pub trait ConversionEngine: Send + Sync {
    /// Engine name for logs and `/health`
    fn name(&self) -> &str;

    /// Ordered stages for `job`. Percents should be non-decreasing; a stage
    /// that goes backwards has its progress report dropped.
    fn plan(&self, job: &Job) -> Result<Vec<Stage>, StageError>;
}

/// Engine standing in for the real audio analysis: fixed stages with a
/// configurable delay, a five-part wind arrangement, and text placeholder
/// artifacts.
pub struct PlaceholderEngine {
    stage_delay: Duration,
}

/// (instrument, role, score)
const WIND_ARRANGEMENT: [(&str, &str, f64); 5] = [
    ("Trumpet1", "Melody", 9.0),
    ("Trombone", "Harmony pad", 8.0),
    ("Horn", "Harmony pad", 7.0),
    ("Tuba", "Bass groove", 9.0),
    ("Drums", "Rhythm", 8.0),
];

impl PlaceholderEngine {
    pub fn new(stage_delay: Duration) -> Self {
        Self { stage_delay }
    }
}

impl ConversionEngine for PlaceholderEngine {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn plan(&self, job: &Job) -> Result<Vec<Stage>, StageError> {
        if job.input_files.is_empty() {
            return Err(StageError::new("job has no input files"));
        }

        let delay = self.stage_delay;
        Ok(vec![
            Stage::new("Extracting features", 20, move |ctx| {
                tracing::debug!(
                    job_id = %ctx.job_id(),
                    files = ctx.input_files().len(),
                    "Extracting features"
                );
                std::thread::sleep(delay);
                Ok(())
            }),
            Stage::new("Classifying instruments", 45, move |_ctx| {
                std::thread::sleep(delay);
                Ok(())
            }),
            Stage::new("Assigning wind parts", 70, move |ctx| {
                std::thread::sleep(delay);
                for (label, role, score) in WIND_ARRANGEMENT {
                    ctx.push_track(Track::new(
                        label,
                        role,
                        score,
                        &[OutputKind::Notation, OutputKind::Audio],
                    ));
                }
                Ok(())
            }),
            Stage::new("Transposing parts", 85, move |ctx| {
                std::thread::sleep(delay);
                write_placeholders(ctx, OutputKind::Notation)
            }),
            Stage::new("Rendering audio", 100, move |ctx| {
                std::thread::sleep(delay);
                write_placeholders(ctx, OutputKind::Audio)
            }),
        ])
    }
}

fn write_placeholders(ctx: &StageContext, kind: OutputKind) -> Result<(), StageError> {
    std::fs::create_dir_all(ctx.output_dir())?;
    for track in ctx.tracks().iter().filter(|t| t.output_kinds.contains(&kind)) {
        if ctx.is_cancelled() {
            return Err(StageError::new("cancelled while writing artifacts"));
        }
        let file_name = track.artifact_file_name(kind);
        std::fs::write(
            ctx.output_dir().join(&file_name),
            format!("This is a placeholder for {} (job {})\n", file_name, ctx.job_id()),
        )?;
    }
    Ok(())
}
