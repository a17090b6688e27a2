//! Flush exclusivity across cache kinds
//!
//! At most one save per [`CacheKind`] may run at a time. Every caller
//! (timer, explicit request, shutdown) goes through
//! [`FlushCoordinator::try_begin_flush`]; a caller that finds its kind busy
//! skips its save instead of queueing it.

use crate::progress::{ProgressSample, SaveProgress};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use warmstart_common::CacheKind;

/// Bookkeeping for one in-flight save
struct FlushSlot {
    started: Instant,
    progress: Option<Arc<SaveProgress>>,
}

/// Registry of cache kinds with a save in flight
#[derive(Default)]
pub struct FlushCoordinator {
    in_flight: DashMap<CacheKind, FlushSlot>,
}

impl FlushCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flush slot of `kind`.
    ///
    /// Returns `None` when a save of that kind is already running. The slot
    /// is released when the returned guard is dropped.
    pub fn try_begin_flush(self: &Arc<Self>, kind: CacheKind) -> Option<FlushGuard> {
        match self.in_flight.entry(kind) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(FlushSlot {
                    started: Instant::now(),
                    progress: None,
                });
                Some(FlushGuard {
                    coordinator: Arc::clone(self),
                    kind,
                })
            }
        }
    }

    /// Check whether a save of `kind` is running
    pub fn is_flushing(&self, kind: CacheKind) -> bool {
        self.in_flight.contains_key(&kind)
    }

    /// Progress of every save currently running, ordered by kind
    pub fn active_saves(&self) -> Vec<ProgressSample> {
        let mut samples: Vec<ProgressSample> = self
            .in_flight
            .iter()
            .filter_map(|slot| slot.progress.as_ref().map(|p| p.sample()))
            .collect();
        samples.sort_by_key(|sample| sample.kind);
        samples
    }

    fn end_flush(&self, kind: CacheKind) {
        if let Some((_, slot)) = self.in_flight.remove(&kind) {
            debug!("{} flush slot released after {:?}", kind, slot.started.elapsed());
        }
    }
}

/// Exclusive right to save one cache kind
pub struct FlushGuard {
    coordinator: Arc<FlushCoordinator>,
    kind: CacheKind,
}

impl FlushGuard {
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Publish the progress of the save holding this slot
    pub fn track(&self, progress: Arc<SaveProgress>) {
        if let Some(mut slot) = self.coordinator.in_flight.get_mut(&self.kind) {
            slot.progress = Some(progress);
        }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.coordinator.end_flush(self.kind);
    }
}

impl std::fmt::Debug for FlushGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushGuard").field("kind", &self.kind).finish()
    }
}
