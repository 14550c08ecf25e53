//! Result packaging
//!
//! Collects a converted job's artifacts into `converted_results_{job_id}.zip`.
//! Files are staged in a scoped scratch directory that is removed on every
//! exit path. Each call writes its archive to its own uniquely named
//! `.partial` file in the downloads directory and renames it into place, so
//! concurrent downloads of the same job never share a half-written archive.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{JobError, JobResult};
use crate::models::{AnalysisResult, JobStatus};
use crate::store::JobStore;

/// Download file name for a job's archive
pub fn archive_file_name(job_id: Uuid) -> String {
    format!("converted_results_{}.zip", job_id)
}

#[derive(Debug, Clone)]
struct PackagerDirs {
    /// Engine output area; `{outputs}/{job_id}/{artifact}`
    outputs: PathBuf,
    downloads: PathBuf,
    scratch: PathBuf,
}

pub struct ResultPackager {
    store: Arc<JobStore>,
    dirs: PackagerDirs,
}

impl ResultPackager {
    pub fn new(
        store: Arc<JobStore>,
        outputs_dir: PathBuf,
        downloads_dir: PathBuf,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            dirs: PackagerDirs {
                outputs: outputs_dir,
                downloads: downloads_dir,
                scratch: scratch_dir,
            },
        }
    }

    /// Build the download archive for a converted job and return its path
    pub async fn package(&self, job_id: Uuid) -> JobResult<PathBuf> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Converted {
            return Err(JobError::NotReady(job_id));
        }
        let result = job.result.ok_or(JobError::NotReady(job_id))?;
        let dirs = self.dirs.clone();

        let archive = tokio::task::spawn_blocking(move || build_archive(job_id, &result, &dirs))
            .await
            .map_err(|e| JobError::packaging("packaging task failed", e))??;

        info!(job_id = %job_id, archive = %archive.display(), "Result archive ready");
        Ok(archive)
    }
}

fn build_archive(job_id: Uuid, result: &AnalysisResult, dirs: &PackagerDirs) -> JobResult<PathBuf> {
    std::fs::create_dir_all(&dirs.scratch)
        .map_err(|e| JobError::packaging("create scratch directory", e))?;
    std::fs::create_dir_all(&dirs.downloads)
        .map_err(|e| JobError::packaging("create downloads directory", e))?;

    // Removed on drop, including every early return below
    let staging = tempfile::Builder::new()
        .prefix(&format!("package-{}-", job_id))
        .tempdir_in(&dirs.scratch)
        .map_err(|e| JobError::packaging("create staging directory", e))?;

    let source_dir = dirs.outputs.join(job_id.to_string());
    let file_names = stage_artifacts(result, &source_dir, staging.path())?;

    let archive_path = dirs.downloads.join(archive_file_name(job_id));

    // Deleted on drop unless persisted
    let partial = tempfile::Builder::new()
        .prefix(".converted_results_")
        .suffix(".zip.partial")
        .tempfile_in(&dirs.downloads)
        .map_err(|e| JobError::packaging("create partial archive", e))?;

    write_zip(partial.as_file(), staging.path(), &file_names)
        .map_err(|e| JobError::packaging("write archive", e))?;
    partial
        .persist(&archive_path)
        .map_err(|e| JobError::packaging("publish archive", e.error))?;

    if !archive_path.is_file() {
        return Err(JobError::PackagingFailure(format!(
            "archive {} was not created",
            archive_path.display()
        )));
    }

    if let Err(e) = staging.close() {
        warn!(job_id = %job_id, error = %e, "Failed to remove staging directory");
    }

    debug!(job_id = %job_id, files = file_names.len(), "Archive written");
    Ok(archive_path)
}

/// Place one file per (track, output kind) in `staging`; returns the file names
///
/// An engine artifact is looked up under its archive name first, then under
/// the unsanitized label when that is a plain file name no other artifact
/// claims. Missing artifacts get a placeholder.
fn stage_artifacts(
    result: &AnalysisResult,
    source_dir: &Path,
    staging: &Path,
) -> JobResult<Vec<String>> {
    let artifacts = result.artifacts();
    let claimed: HashSet<&str> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
    let mut file_names = Vec::with_capacity(artifacts.len());

    for artifact in &artifacts {
        let name = &artifact.file_name;
        let track = &result.tracks[artifact.track_index];

        let raw = raw_artifact_name(&track.instrument_label, artifact.kind.extension())
            .filter(|raw| raw != name && !claimed.contains(raw.as_str()));
        let source = std::iter::once(source_dir.join(name))
            .chain(raw.map(|raw| source_dir.join(raw)))
            .find(|path| path.is_file());

        let target = staging.join(name);
        match source {
            Some(source) => {
                std::fs::copy(&source, &target)
                    .map_err(|e| JobError::packaging(&format!("copy {}", name), e))?;
            }
            None => {
                std::fs::write(&target, format!("This is a placeholder for {}\n", name))
                    .map_err(|e| JobError::packaging(&format!("write {}", name), e))?;
            }
        }

        file_names.push(name.clone());
    }

    Ok(file_names)
}

/// `{label}.{extension}` if that is a single normal path component
fn raw_artifact_name(label: &str, extension: &str) -> Option<String> {
    let name = format!("{}.{}", label, extension);
    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

fn write_zip(file: &File, staging: &Path, file_names: &[String]) -> io::Result<()> {
    let mut zip = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for name in file_names {
        zip.start_file(name.as_str(), options).map_err(io::Error::other)?;
        let mut source = File::open(staging.join(name))?;
        io::copy(&mut source, &mut zip)?;
    }

    let file = zip.finish().map_err(io::Error::other)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InputFile, OutputKind, Track};
    use chrono::Utc;
    use std::io::Read;

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<JobStore>,
        packager: ResultPackager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs")));
        let packager = ResultPackager::new(
            store.clone(),
            dir.path().join("outputs"),
            dir.path().join("downloads"),
            dir.path().join("scratch"),
        );
        Fixture { dir, store, packager }
    }

    fn scratch_is_empty(root: &Path) -> bool {
        match std::fs::read_dir(root.join("scratch")) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    async fn converted_job(store: &JobStore, tracks: Vec<Track>) -> Uuid {
        let job_id = store
            .create(vec![InputFile {
                display_name: "tune.mid".to_string(),
                stored_path: PathBuf::from("/uploads/tune.mid"),
                size: 10,
            }])
            .await
            .unwrap();
        store
            .complete(
                job_id,
                AnalysisResult {
                    job_id,
                    completed_at: Utc::now(),
                    tracks,
                },
            )
            .await
            .unwrap();
        job_id
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    fn partial_archives(root: &Path) -> Vec<String> {
        std::fs::read_dir(root.join("downloads"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".partial"))
            .collect()
    }

    #[tokio::test]
    async fn test_not_ready_without_result() {
        let f = fixture();
        let job_id = f.store.create(Vec::new()).await.unwrap();

        assert_eq!(f.packager.package(job_id).await, Err(JobError::NotReady(job_id)));
        assert!(!f.dir.path().join("scratch").exists());
        assert!(scratch_is_empty(f.dir.path()));
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let f = fixture();
        let id = Uuid::new_v4();
        assert_eq!(f.packager.package(id).await, Err(JobError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_archive_holds_one_file_per_output_kind() {
        let f = fixture();
        let job_id = converted_job(
            &f.store,
            vec![
                Track::new("Trumpet1", "Melody", 9.0, &[OutputKind::Notation, OutputKind::Audio]),
                Track::new("Tuba", "Bass groove", 9.0, &[OutputKind::Notation]),
            ],
        )
        .await;

        // One artifact exists in the engine output area, the rest get placeholders
        let source_dir = f.dir.path().join("outputs").join(job_id.to_string());
        std::fs::create_dir_all(&source_dir).unwrap();
        std::fs::write(source_dir.join("Tuba.mid"), b"MThd-real-midi").unwrap();

        let archive_path = f.packager.package(job_id).await.unwrap();
        assert_eq!(
            archive_path.file_name().unwrap().to_string_lossy(),
            format!("converted_results_{}.zip", job_id)
        );

        assert_eq!(archive_names(&archive_path), vec!["Trumpet1.mid", "Trumpet1.wav", "Tuba.mid"]);

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();

        let mut content = String::new();
        archive
            .by_name("Tuba.mid")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "MThd-real-midi");

        assert!(scratch_is_empty(f.dir.path()));
        assert!(partial_archives(f.dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_result_without_converted_status_is_not_ready() {
        let f = fixture();
        let job_id = f.store.create(Vec::new()).await.unwrap();
        f.store.update_status(job_id, JobStatus::Processing).await.unwrap();
        f.store
            .attach_result(
                job_id,
                AnalysisResult {
                    job_id,
                    completed_at: Utc::now(),
                    tracks: vec![Track::new("Oboe", "Melody", 6.0, &[OutputKind::Notation])],
                },
            )
            .await
            .unwrap();

        assert_eq!(f.packager.package(job_id).await, Err(JobError::NotReady(job_id)));
        assert!(!f.dir.path().join("downloads").exists());
    }

    #[tokio::test]
    async fn test_colliding_and_non_ascii_labels_all_reach_the_archive() {
        let f = fixture();
        let job_id = converted_job(
            &f.store,
            vec![
                Track::new("Horn/1", "Melody", 9.0, &[OutputKind::Notation]),
                Track::new("Horn:1", "Counter", 8.0, &[OutputKind::Notation]),
                Track::new("主旋律", "Melody", 7.0, &[OutputKind::Notation]),
                Track::new("低音部", "Bass", 6.0, &[OutputKind::Notation]),
            ],
        )
        .await;

        // Engines that write under the raw label are still found
        let source_dir = f.dir.path().join("outputs").join(job_id.to_string());
        std::fs::create_dir_all(&source_dir).unwrap();
        std::fs::write(source_dir.join("Horn:1.mid"), b"second horn").unwrap();
        std::fs::write(source_dir.join("主旋律.mid"), b"main melody").unwrap();

        let archive_path = f.packager.package(job_id).await.unwrap();
        assert_eq!(
            archive_names(&archive_path),
            vec!["Horn_1-2.mid", "Horn_1.mid", "主旋律.mid", "低音部.mid"]
        );

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("Horn_1-2.mid")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second horn");

        content.clear();
        archive
            .by_name("主旋律.mid")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "main melody");

        // The first horn has no engine file of its own and must not borrow one
        content.clear();
        archive
            .by_name("Horn_1.mid")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.starts_with("This is a placeholder"), "{}", content);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_packaging_of_one_job() {
        let f = fixture();
        let tracks: Vec<Track> = (1..=40)
            .map(|i| {
                Track::new(
                    &format!("Part{}", i),
                    "Melody",
                    5.0,
                    &[OutputKind::Notation, OutputKind::Audio],
                )
            })
            .collect();
        let job_id = converted_job(&f.store, tracks).await;
        let packager = Arc::new(f.packager);

        let mut calls = Vec::new();
        for _ in 0..8 {
            let packager = packager.clone();
            calls.push(tokio::spawn(async move { packager.package(job_id).await }));
        }

        let mut paths = Vec::new();
        for call in calls {
            paths.push(call.await.unwrap().unwrap());
        }
        assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));

        let archive = zip::ZipArchive::new(File::open(&paths[0]).unwrap()).unwrap();
        assert_eq!(archive.len(), 80);
        assert!(partial_archives(f.dir.path()).is_empty());
        assert!(scratch_is_empty(f.dir.path()));
    }

    #[tokio::test]
    async fn test_repackaging_replaces_archive() {
        let f = fixture();
        let job_id = converted_job(
            &f.store,
            vec![Track::new("Horn", "Harmony pad", 7.0, &[OutputKind::Audio])],
        )
        .await;

        let first = f.packager.package(job_id).await.unwrap();
        let second = f.packager.package(job_id).await.unwrap();
        assert_eq!(first, second);

        let archive = zip::ZipArchive::new(File::open(&second).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_cleans_up_staging_and_partial_archive() {
        let f = fixture();
        let job_id = converted_job(
            &f.store,
            vec![Track::new("Drums", "Rhythm", 8.0, &[OutputKind::Notation])],
        )
        .await;

        // Make the final archive path a non-empty directory so the rename fails
        let blocker = f
            .dir
            .path()
            .join("downloads")
            .join(archive_file_name(job_id));
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        let result = f.packager.package(job_id).await;
        assert!(matches!(result, Err(JobError::PackagingFailure(_))));
        assert!(scratch_is_empty(f.dir.path()));
        assert!(partial_archives(f.dir.path()).is_empty());
        assert!(blocker.join("occupied").is_dir());
    }
}
