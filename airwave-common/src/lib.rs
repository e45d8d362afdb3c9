//! # Airwave Common
//!
//! Shared infrastructure for the Airwave broadcast-log reconciliation engine:
//! - Error types
//! - Tiered configuration resolution (env → TOML → compiled default)
//! - Database bootstrap and schema-sync helpers
//! - Job progress event bus
//! - Retry-with-backoff helper for transient database errors

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod retry;

pub use error::{Error, Result};
pub use events::{EventBus, JobProgress, JobState};
