//! Save progress reporting
//!
//! A running save publishes its counters through a shared [`SaveProgress`];
//! readers take [`ProgressSample`]s at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use warmstart_common::{CacheKind, OperationType};

/// Live counters of one save
#[derive(Debug)]
pub struct SaveProgress {
    kind: CacheKind,
    keys_written: AtomicU64,
    keys_estimate: u64,
    started: Instant,
}

impl SaveProgress {
    pub fn new(kind: CacheKind, keys_estimate: u64) -> Self {
        Self {
            kind,
            keys_written: AtomicU64::new(0),
            keys_estimate,
            started: Instant::now(),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn keys_estimate(&self) -> u64 {
        self.keys_estimate
    }

    pub fn keys_written(&self) -> u64 {
        self.keys_written.load(Ordering::Relaxed)
    }

    pub(crate) fn record_written(&self, keys_written: u64) {
        self.keys_written.store(keys_written, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current position; the total never drops below what was written
    pub fn sample(&self) -> ProgressSample {
        let completed = self.keys_written();
        ProgressSample {
            kind: self.kind,
            operation: self.kind.save_operation(),
            completed,
            total: completed.max(self.keys_estimate),
            unit: "keys",
        }
    }
}

/// Point-in-time progress of a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub kind: CacheKind,
    pub operation: OperationType,
    pub completed: u64,
    pub total: u64,
    pub unit: &'static str,
}

impl ProgressSample {
    /// Completed fraction (0.0 to 1.0)
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}
