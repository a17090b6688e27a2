//! Per-kind key serialization contract
//!
//! The engine never looks inside a key beyond its owning table. How a key
//! is written, and how a saved key is turned back into a live entry, is
//! supplied by the cache kind through [`SnapshotSerializer`].

use futures::future::BoxFuture;
use std::io::{self, Read, Write};
use warmstart_common::TableId;

/// Pending reconstruction of one saved entry.
///
/// Resolves to `None` when the value can no longer be resolved, in which
/// case the entry is skipped.
pub type Hydration<K, V> = BoxFuture<'static, Option<(K, V)>>;

/// A key held by a snapshottable cache
pub trait CacheKey: Clone + Send + Sync + 'static {
    /// Table the cached entry belongs to
    fn table_id(&self) -> TableId;
}

/// Live table handed to the serializer while a snapshot is loaded
pub trait TableHandle: Send + Sync + 'static {
    fn table_id(&self) -> TableId;
}

/// Encodes keys into snapshot files and rebuilds entries from them
pub trait SnapshotSerializer<K, V>: Send + Sync + 'static {
    /// Table context needed to rebuild values
    type Table: TableHandle;

    /// Write one key to the snapshot output
    fn encode(&self, key: &K, out: &mut dyn Write) -> io::Result<()>;

    /// Read one saved key and start rebuilding its entry.
    ///
    /// `Ok(None)` skips the record, e.g. when its table is gone. Any error
    /// ends the scan of the file.
    fn decode(&self, input: &mut dyn Read, table: &Self::Table) -> io::Result<Option<Hydration<K, V>>>;
}
