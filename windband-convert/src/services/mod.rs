//! Job lifecycle services

pub mod engine;
pub mod orchestrator;
pub mod packager;
pub mod progress_tracker;
pub mod status;

pub use engine::{ConversionEngine, PlaceholderEngine, Stage, StageContext, StageError};
pub use orchestrator::{ConversionHandle, ConversionOrchestrator, JobOutcome};
pub use packager::{archive_file_name, ResultPackager};
pub use progress_tracker::ProgressTracker;
pub use status::{StatusReconciler, StatusView, ViewStatus};
