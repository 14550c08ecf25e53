//! Data models for windband-convert
//!
//! - Durable job records and analysis results
//! - Ephemeral progress entries

pub mod job;
pub mod progress;

pub use job::{AnalysisResult, Artifact, InputFile, Job, JobStatus, OutputKind, Track};
pub use progress::{ProgressEntry, ProgressStatus};
