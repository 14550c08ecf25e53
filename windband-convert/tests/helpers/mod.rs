//! Test Helper Utilities
//!
//! Shared app builder, request helpers and scripted engines for the
//! windband-convert integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;
use windband_common::config::{RootFolderInitializer, TomlConfig};
use windband_convert::config::{Cli, ServiceConfig};
use windband_convert::models::{Job, OutputKind, Track};
use windband_convert::services::{ConversionEngine, Stage, StageContext, StageError};
use windband_convert::AppState;

/// Engine with scripted stages; produces one part per input file
pub struct ScriptedEngine {
    stages: Vec<(&'static str, u8)>,
    delay: Duration,
    /// Index of the stage that fails, if any
    fail_at: Option<usize>,
}

impl ScriptedEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            stages: vec![
                ("Reading input", 25),
                ("Analysing", 50),
                ("Arranging", 75),
                ("Writing parts", 100),
            ],
            delay,
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl ConversionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn plan(&self, job: &Job) -> Result<Vec<Stage>, StageError> {
        let part_count = job.input_files.len();
        let last = self.stages.len().saturating_sub(1);

        Ok(self
            .stages
            .iter()
            .enumerate()
            .map(|(index, &(label, percent))| {
                let delay = self.delay;
                let fail = self.fail_at == Some(index);
                Stage::new(label, percent, move |ctx: &mut StageContext| {
                    std::thread::sleep(delay);
                    if fail {
                        return Err(StageError::new(format!("{} failed: corrupt input", label)));
                    }
                    if index == last {
                        for i in 0..part_count {
                            let track = Track::new(
                                &format!("Part{}", i + 1),
                                "Melody",
                                5.0,
                                &[OutputKind::Notation, OutputKind::Audio],
                            );
                            // Only the notation file is written; audio is left to the packager
                            std::fs::write(
                                ctx.output_dir().join(track.artifact_file_name(OutputKind::Notation)),
                                format!("notation for part {}", i + 1),
                            )?;
                            ctx.push_track(track);
                        }
                    }
                    Ok(())
                })
            })
            .collect())
    }
}

/// Router plus the state and scratch root behind it
pub struct TestApp {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
    pub state: AppState,
    pub router: Router,
}

/// App over a fresh temp root with default settings
pub fn test_app(engine: Arc<dyn ConversionEngine>) -> TestApp {
    test_app_with(engine, |_| {})
}

/// App over a fresh temp root; `adjust` tweaks the settings first
pub fn test_app_with(
    engine: Arc<dyn ConversionEngine>,
    adjust: impl FnOnce(&mut ServiceConfig),
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let cli = Cli {
        root_folder: Some(root.clone()),
        ..Cli::default()
    };
    let mut config = ServiceConfig::from_sources(&cli, &TomlConfig::default());
    adjust(&mut config);

    let layout = RootFolderInitializer::new(root.clone());
    layout.ensure_directories_exist().unwrap();

    let state = AppState::new(&layout, &config, engine);
    let router = windband_convert::build_router(state.clone());

    TestApp {
        _dir: dir,
        root,
        state,
        router,
    }
}

impl TestApp {
    /// Send a request and return the raw response
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap())),
            None => request.body(Body::empty()),
        };

        self.router.clone().oneshot(request.unwrap()).await.unwrap()
    }

    /// Send a request and decode the JSON body
    pub async fn send_json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.send(method, uri, body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Create a job from `(display_name, size)` pairs; panics unless 201
    pub async fn create_job(&self, files: &[(&str, u64)]) -> Uuid {
        let (status, body) = self
            .send_json("POST", "/jobs", Some(files_body(files)))
            .await;
        assert_eq!(status, StatusCode::CREATED, "unexpected body: {}", body);
        body["job_id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn status(&self, job_id: Uuid) -> Value {
        let (status, body) = self
            .send_json("GET", &format!("/jobs/{}/status", job_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    /// Poll the status endpoint until `done` accepts it
    pub async fn wait_for_status(
        &self,
        job_id: Uuid,
        timeout: Duration,
        done: impl Fn(&Value) -> bool,
    ) -> Value {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status(job_id).await;
            if done(&status) {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "job {} did not reach the expected state, last status: {}",
                job_id,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the job reports `completed` or `error`
    pub async fn wait_until_finished(&self, job_id: Uuid) -> Value {
        self.wait_for_status(job_id, Duration::from_secs(10), |s| {
            s["status"] == "completed" || s["status"] == "error"
        })
        .await
    }
}

/// `POST /jobs` body from `(display_name, size)` pairs
pub fn files_body(files: &[(&str, u64)]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|(name, size)| {
            json!({
                "display_name": name,
                "stored_path": format!("/uploads/{}", name),
                "size": size,
            })
        })
        .collect();
    json!({ "files": files })
}
