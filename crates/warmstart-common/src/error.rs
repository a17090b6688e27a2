//! Error types for warmstart
//!
//! Every failure in this subsystem degrades warm-start effectiveness only;
//! callers log these errors and carry on serving with a colder cache.

use crate::types::TableId;
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for warmstart operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for warmstart
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table unknown to the schema: {0}")]
    UnknownTable(TableId),

    #[error("corrupt snapshot {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an I/O error raised while writing snapshot bytes
    pub fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Describe a snapshot that could not be decoded past some point
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error only means the table was dropped
    #[must_use]
    pub fn is_unknown_table(&self) -> bool {
        matches!(self, Self::UnknownTable(_))
    }

    /// Path of the file involved, if any
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::WriteFailed { path, .. } | Self::Corrupt { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }
}
