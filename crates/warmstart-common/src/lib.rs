//! warmstart Common - Shared types and utilities
//!
//! This crate provides the identifiers, configuration and error
//! definitions shared by the snapshot engine and its tooling.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CacheSaveConfig, MAX_SAVE_PERIOD_SECS, SnapshotConfig};
pub use error::{Error, Result};
pub use types::*;
