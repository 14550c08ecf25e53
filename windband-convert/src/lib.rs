//! windband-convert library interface
//!
//! Exposes the application state and router so integration tests can drive
//! the HTTP surface without binding a socket.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, JobError, JobResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;
use windband_common::config::RootFolderInitializer;
use windband_common::events::EventBus;

use crate::config::{IntakeLimits, ServiceConfig};
use crate::services::{
    ConversionEngine, ConversionOrchestrator, ProgressTracker, ResultPackager, StatusReconciler,
};
use crate::store::JobStore;

/// Broadcast buffer for progress events
const EVENT_BUS_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub tracker: ProgressTracker,
    pub orchestrator: ConversionOrchestrator,
    pub reconciler: Arc<StatusReconciler>,
    pub packager: Arc<ResultPackager>,
    /// Progress events for SSE subscribers
    pub event_bus: EventBus,
    pub intake: IntakeLimits,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the job lifecycle components over the root folder layout
    pub fn new(
        layout: &RootFolderInitializer,
        config: &ServiceConfig,
        engine: Arc<dyn ConversionEngine>,
    ) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let store = Arc::new(JobStore::new(layout.jobs_dir()));
        let tracker = ProgressTracker::new(config.progress_retention, event_bus.clone());

        let orchestrator = ConversionOrchestrator::new(
            store.clone(),
            tracker.clone(),
            engine,
            layout.outputs_dir(),
        )
        .with_job_timeout(config.job_timeout);

        let reconciler = Arc::new(StatusReconciler::new(store.clone(), tracker.clone()));
        let packager = Arc::new(ResultPackager::new(
            store.clone(),
            layout.outputs_dir(),
            layout.downloads_dir(),
            layout.scratch_dir(),
        ));

        Self {
            store,
            tracker,
            orchestrator,
            reconciler,
            packager,
            event_bus,
            intake: config.intake.clone(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
