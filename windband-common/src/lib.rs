//! # windband common library
//!
//! Shared code for the windband services:
//! - Error and result types
//! - TOML configuration loading and root folder resolution
//! - Progress event bus
//! - Small time, UUID and size-formatting helpers

pub mod config;
pub mod error;
pub mod events;
pub mod human_size;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
