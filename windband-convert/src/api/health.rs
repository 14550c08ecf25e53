//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Build information captured by build.rs
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub git_hash: String,
    pub timestamp: String,
    pub profile: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("windband-convert")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub build: BuildInfo,
    /// Conversions currently running
    pub active_jobs: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        build: BuildInfo {
            git_hash: env!("GIT_HASH").to_string(),
            timestamp: env!("BUILD_TIMESTAMP").to_string(),
            profile: env!("BUILD_PROFILE").to_string(),
        },
        active_jobs: state.orchestrator.active_jobs().await.len(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
