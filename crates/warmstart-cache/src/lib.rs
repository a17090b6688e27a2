//! warmstart Cache - Cache snapshot and warm-start recovery engine
//!
//! This crate periodically persists the contents of in-memory caches so a
//! restarted node can warm them instead of starting cold:
//! - Snapshot file naming and stale-file cleanup
//! - Crash-safe writes (temp file, fsync, atomic rename per table)
//! - At most one save per cache kind at a time
//! - Hot-key selection for bounded saves
//! - Bounded-concurrency reload on startup

pub mod cache;
pub mod catalog;
pub mod cleanup;
pub mod context;
pub mod coordinator;
pub mod flush;
pub mod naming;
pub mod progress;
pub mod serializer;
pub mod service;
pub mod stream;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-exports
pub use cache::{BoundedCache, CacheStats, KeyIter, LruCache};
pub use catalog::{InMemoryCatalog, SchemaCatalog};
pub use context::SnapshotContext;
pub use coordinator::{CacheSnapshotCoordinator, LoadResult, SaveHandle};
pub use flush::{FlushCoordinator, FlushGuard};
pub use naming::{SnapshotFileName, SnapshotNaming, canonical_file_name};
pub use progress::{ProgressSample, SaveProgress};
pub use serializer::{CacheKey, Hydration, SnapshotSerializer, TableHandle};
pub use service::{ManagedSnapshots, SnapshotService};
pub use stream::{FileOutput, FsStreamFactory, SnapshotOutput, StreamFactory};
pub use writer::{FailureStage, SaveReport, SnapshotWriter, TableFailure};
