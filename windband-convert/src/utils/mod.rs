//! Utility modules for windband-convert

pub mod retry;

pub use retry::retry_on_storage_failure;
