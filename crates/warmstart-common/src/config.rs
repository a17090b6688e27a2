//! Configuration types for warmstart
//!
//! Where snapshots live, how often each cache kind is saved, how many
//! keys a save keeps, and how much hydration work may run at once on load.

use crate::error::{Error, Result};
use crate::types::CacheKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted save period, about 68 years
pub const MAX_SAVE_PERIOD_SECS: u64 = i32::MAX as u64;

/// Root configuration for cache snapshots
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory holding every cache snapshot file
    pub saved_caches_directory: PathBuf,
    /// Maximum number of entry hydrations in flight while loading
    pub load_concurrency: usize,
    /// Key cache saving
    pub key_cache: CacheSaveConfig,
    /// Row cache saving
    pub row_cache: CacheSaveConfig,
    /// Counter cache saving
    pub counter_cache: CacheSaveConfig,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            saved_caches_directory: PathBuf::from("./saved_caches"),
            load_concurrency: 64,
            key_cache: CacheSaveConfig {
                save_period_secs: 4 * 60 * 60, // 4 hours
                keys_to_save: 0,
            },
            row_cache: CacheSaveConfig {
                save_period_secs: 0, // disabled
                keys_to_save: 0,
            },
            counter_cache: CacheSaveConfig {
                save_period_secs: 2 * 60 * 60, // 2 hours
                keys_to_save: 0,
            },
        }
    }
}

impl SnapshotConfig {
    /// Create config with a saved caches directory
    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            saved_caches_directory: dir.into(),
            ..Default::default()
        }
    }

    /// Saving configuration of one cache kind
    #[must_use]
    pub fn for_kind(&self, kind: CacheKind) -> &CacheSaveConfig {
        match kind {
            CacheKind::KeyCache => &self.key_cache,
            CacheKind::RowCache => &self.row_cache,
            CacheKind::CounterCache => &self.counter_cache,
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.saved_caches_directory.as_os_str().is_empty() {
            return Err(Error::configuration("saved_caches_directory is empty"));
        }
        if self.load_concurrency == 0 {
            return Err(Error::configuration("load_concurrency must be at least 1"));
        }
        for kind in CacheKind::ALL {
            let period = self.for_kind(kind).save_period_secs;
            if period > MAX_SAVE_PERIOD_SECS {
                return Err(Error::configuration(format!(
                    "{kind} save_period_secs {period} exceeds {MAX_SAVE_PERIOD_SECS}"
                )));
            }
        }
        Ok(())
    }
}

/// Periodic saving of one cache kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSaveConfig {
    /// Seconds between saves; 0 disables periodic saving
    pub save_period_secs: u64,
    /// Upper bound on saved keys; 0 saves the whole cache
    pub keys_to_save: usize,
}

impl CacheSaveConfig {
    /// Save period, or `None` when periodic saving is disabled
    #[must_use]
    pub fn save_period(&self) -> Option<Duration> {
        (self.save_period_secs > 0).then(|| Duration::from_secs(self.save_period_secs))
    }
}
