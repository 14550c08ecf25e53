//! HTTP API handlers for windband-convert
//!
//! REST endpoints for the job lifecycle plus an SSE progress stream.

pub mod extract;
pub mod health;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::event_stream;
