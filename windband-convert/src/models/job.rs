//! Durable job records
//!
//! A job moves `uploaded → processing → converted`. The `error` status exists
//! for records written by other tooling; this service leaves failed jobs in
//! `processing` and reports the failure through the progress tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Persisted job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Files received, conversion not requested yet
    Uploaded,
    /// Conversion requested (running, failed, or abandoned)
    Processing,
    /// Result attached
    Converted,
    Error,
}

/// One validated input file handed over by the upload intake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Name shown to the user (as uploaded)
    pub display_name: String,
    /// Where the intake stored the file
    pub stored_path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

impl InputFile {
    /// Lower-case extension of the display name, if any
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.display_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// One conversion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub input_files: Vec<InputFile>,
    /// Present iff `status == Converted`
    #[serde(default)]
    pub result: Option<AnalysisResult>,
}

impl Job {
    pub fn new(job_id: Uuid, input_files: Vec<InputFile>) -> Self {
        Self {
            job_id,
            status: JobStatus::Uploaded,
            created_at: windband_common::time::now(),
            input_files,
            result: None,
        }
    }

    /// Artifact file names the download archive will contain (empty until converted)
    pub fn output_file_names(&self) -> Vec<String> {
        self.result
            .as_ref()
            .map(|result| {
                result
                    .artifacts()
                    .into_iter()
                    .map(|artifact| artifact.file_name)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Output of a completed conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub tracks: Vec<Track>,
}

/// One file of the download archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Index into `AnalysisResult::tracks`
    pub track_index: usize,
    pub kind: OutputKind,
    /// Unique within the result
    pub file_name: String,
}

impl AnalysisResult {
    /// Every (track, kind) pair with a file name unique within the archive
    ///
    /// Tracks whose labels reduce to the same stem keep the first stem as is;
    /// later ones get `-2`, `-3`, ... appended in track order. Names are
    /// compared case-insensitively so the archive also extracts cleanly on
    /// case-insensitive file systems.
    pub fn artifacts(&self) -> Vec<Artifact> {
        let mut taken = HashSet::new();
        let mut artifacts = Vec::new();

        for (track_index, track) in self.tracks.iter().enumerate() {
            let base = sanitize_file_stem(&track.instrument_label);
            let mut stem = base.clone();
            let mut suffix = 2;
            while !taken.insert(stem.to_lowercase()) {
                stem = format!("{}-{}", base, suffix);
                suffix += 1;
            }

            for kind in &track.output_kinds {
                artifacts.push(Artifact {
                    track_index,
                    kind: *kind,
                    file_name: format!("{}.{}", stem, kind.extension()),
                });
            }
        }

        artifacts
    }
}

/// Artifact kinds a track can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// MIDI part
    Notation,
    /// Rendered audio
    Audio,
}

impl OutputKind {
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Notation => "mid",
            OutputKind::Audio => "wav",
        }
    }
}

/// One output stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Instrument name; also the artifact file stem
    pub instrument_label: String,
    pub role: String,
    pub score: f64,
    pub output_kinds: BTreeSet<OutputKind>,
}

impl Track {
    pub fn new(instrument_label: &str, role: &str, score: f64, kinds: &[OutputKind]) -> Self {
        Self {
            instrument_label: instrument_label.to_string(),
            role: role.to_string(),
            score,
            output_kinds: kinds.iter().copied().collect(),
        }
    }

    /// `{instrument_label}.{extension}` with the label reduced to a safe file stem
    pub fn artifact_file_name(&self, kind: OutputKind) -> String {
        format!("{}.{}", sanitize_file_stem(&self.instrument_label), kind.extension())
    }

    pub fn artifact_file_names(&self) -> Vec<String> {
        self.output_kinds
            .iter()
            .map(|kind| self.artifact_file_name(*kind))
            .collect()
    }
}

/// Reduce a label to a single safe path component
///
/// Letters and digits in any script are kept. Path separators, characters
/// reserved on common file systems and control characters become `_`, and
/// leading dots are dropped so a label can never name `..` or a hidden file.
pub fn sanitize_file_stem(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim_end();

    if cleaned.is_empty() {
        "track".to_string()
    } else {
        cleaned.to_string()
    }
}
