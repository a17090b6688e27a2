//! Snapshot writer
//!
//! One [`SnapshotWriter`] performs one save of one cache kind:
//!
//! 1. delete this kind's stale files (older versions, legacy names, temp leftovers)
//! 2. stop early if the selection is empty, leaving current snapshots alone
//! 3. stream each selected key into a temp file of its table
//! 4. release the key selection and every output
//! 5. fsync and rename each temp file onto its canonical path
//! 6. delete current snapshots of tables that were not part of this save
//!
//! A failure while opening or writing a table's output abandons that table
//! only; its previous snapshot, if any, stays in place.

use crate::cache::{BoundedCache, KeyIter};
use crate::cleanup;
use crate::naming::SnapshotNaming;
use crate::progress::{ProgressSample, SaveProgress};
use crate::serializer::{CacheKey, SnapshotSerializer};
use crate::stream::{SnapshotOutput, StreamFactory};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use warmstart_common::{CURRENT_VERSION, CacheKind, Error, Result, TableId};

/// Where a table's save went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Creating the temp file
    Open,
    /// Encoding a key into the temp file
    Encode,
    /// Syncing or renaming the temp file
    Commit,
}

/// A table whose snapshot could not be written
#[derive(Debug)]
pub struct TableFailure {
    pub table_id: TableId,
    pub stage: FailureStage,
    pub error: Error,
}

/// Outcome of one save
#[derive(Debug)]
pub struct SaveReport {
    pub kind: CacheKind,
    /// Keys in committed snapshot files
    pub keys_written: u64,
    /// Tables whose snapshot was replaced
    pub tables_committed: usize,
    /// Superseded snapshots removed after commit
    pub tables_retired: usize,
    pub failures: Vec<TableFailure>,
    pub elapsed: Duration,
}

impl SaveReport {
    fn empty(kind: CacheKind, elapsed: Duration) -> Self {
        Self {
            kind,
            keys_written: 0,
            tables_committed: 0,
            tables_retired: 0,
            failures: Vec::new(),
            elapsed,
        }
    }

    /// True when every selected table was committed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Open temp file of one table
struct TableOutput {
    temp_path: PathBuf,
    canonical_path: PathBuf,
    stream: Box<dyn SnapshotOutput>,
    entries: u64,
}

impl TableOutput {
    /// Make the temp file durable and promote it onto the canonical path
    fn commit(mut self) -> Result<u64> {
        if let Err(e) = self.stream.sync() {
            let temp_path = self.abandon();
            return Err(Error::write_failed(temp_path, e));
        }
        drop(self.stream);

        // rename replaces any previous snapshot atomically
        if let Err(e) = fs::rename(&self.temp_path, &self.canonical_path) {
            remove_quietly(&self.temp_path);
            return Err(Error::io(self.canonical_path, e));
        }
        Ok(self.entries)
    }

    /// Close and delete the temp file
    fn abandon(self) -> PathBuf {
        drop(self.stream);
        remove_quietly(&self.temp_path);
        self.temp_path
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {:?}: {}", path, e),
    }
}

/// One save of one cache kind
pub struct SnapshotWriter<K, V, S> {
    kind: CacheKind,
    keys: KeyIter<K>,
    naming: Arc<SnapshotNaming>,
    serializer: Arc<S>,
    streams: Arc<dyn StreamFactory>,
    progress: Arc<SaveProgress>,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, S> SnapshotWriter<K, V, S>
where
    K: CacheKey,
    S: SnapshotSerializer<K, V>,
{
    /// Select the keys to save.
    ///
    /// `keys_to_save` of 0, or at least the cache size, saves every key;
    /// anything smaller saves that many of the cache's hottest keys.
    pub fn new(
        kind: CacheKind,
        cache: &dyn BoundedCache<K, V>,
        keys_to_save: usize,
        naming: Arc<SnapshotNaming>,
        serializer: Arc<S>,
        streams: Arc<dyn StreamFactory>,
    ) -> Self {
        let size = cache.len();
        let (keys, keys_estimate) = if keys_to_save == 0 || keys_to_save >= size {
            (cache.keys(), size)
        } else {
            (cache.hot_keys(keys_to_save), keys_to_save)
        };

        Self {
            kind,
            keys,
            naming,
            serializer,
            streams,
            progress: Arc::new(SaveProgress::new(kind, keys_estimate as u64)),
            _value: PhantomData,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Shared counters, for publishing while the save runs
    pub fn progress_handle(&self) -> Arc<SaveProgress> {
        Arc::clone(&self.progress)
    }

    pub fn progress(&self) -> ProgressSample {
        self.progress.sample()
    }

    /// Run the save to completion
    pub fn save(mut self) -> Result<SaveReport> {
        let start = Instant::now();
        let directory = self.naming.directory().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| Error::io(&directory, e))?;

        debug!("Deleting old {} files.", self.kind);
        if let Err(e) = cleanup::delete_stale_files(&directory, self.kind) {
            warn!("Could not clean up {} files in {:?}: {}", self.kind, directory, e);
        }

        let mut keys = std::mem::replace(&mut self.keys, Box::new(std::iter::empty()));
        let Some(first) = keys.next() else {
            debug!("Skipping {} save, cache is empty.", self.kind);
            return Ok(SaveReport::empty(self.kind, start.elapsed()));
        };

        let (outputs, mut failures) = self.write_tables(std::iter::once(first).chain(&mut keys));
        // release the selection before touching the file system again
        drop(keys);

        let mut committed = Vec::with_capacity(outputs.len());
        let mut keys_written = 0;
        for (table_id, output) in outputs {
            let temp_path = output.temp_path.clone();
            let canonical_path = output.canonical_path.clone();
            match output.commit() {
                Ok(entries) => {
                    keys_written += entries;
                    committed.push(table_id);
                }
                Err(e) => {
                    error!("Unable to commit {:?} to {:?}: {}", temp_path, canonical_path, e);
                    failures.push(TableFailure {
                        table_id,
                        stage: FailureStage::Commit,
                        error: e,
                    });
                }
            }
        }

        let tables_retired = self.retire_superseded(&committed, &failures);

        let report = SaveReport {
            kind: self.kind,
            keys_written,
            tables_committed: committed.len(),
            tables_retired,
            failures,
            elapsed: start.elapsed(),
        };
        info!(
            "Saved {} ({} items) in {} ms",
            self.kind,
            report.keys_written,
            report.elapsed.as_millis()
        );
        Ok(report)
    }

    /// Stream keys into per-table temp files
    fn write_tables(
        &self,
        keys: impl Iterator<Item = K>,
    ) -> (HashMap<TableId, TableOutput>, Vec<TableFailure>) {
        let estimate = self.progress.keys_estimate();
        let catalog = self.naming.catalog();
        let mut outputs: HashMap<TableId, TableOutput> = HashMap::new();
        let mut failures: Vec<TableFailure> = Vec::new();
        let mut keys_written = 0u64;

        for key in keys {
            let table_id = key.table_id();
            if failures.iter().any(|f| f.table_id == table_id) {
                continue;
            }
            if !catalog.contains(table_id) {
                continue; // the table has been dropped
            }

            let output = match outputs.entry(table_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match self.open_output(table_id) {
                    Ok(output) => entry.insert(output),
                    Err(e) if e.is_unknown_table() => continue,
                    Err(e) => {
                        error!("Failed to open {} snapshot for table {}: {}", self.kind, table_id, e);
                        failures.push(TableFailure {
                            table_id,
                            stage: FailureStage::Open,
                            error: e,
                        });
                        continue;
                    }
                },
            };

            match self.serializer.encode(&key, &mut output.stream) {
                Ok(()) => output.entries += 1,
                Err(e) => {
                    if let Some(output) = outputs.remove(&table_id) {
                        let temp_path = output.abandon();
                        error!("Failed to write {} key to {:?}: {}", self.kind, temp_path, e);
                        failures.push(TableFailure {
                            table_id,
                            stage: FailureStage::Encode,
                            error: Error::write_failed(temp_path, e),
                        });
                    }
                    continue;
                }
            }

            keys_written += 1;
            self.progress.record_written(keys_written);
            if keys_written >= estimate {
                break;
            }
        }

        (outputs, failures)
    }

    fn open_output(&self, table_id: TableId) -> Result<TableOutput> {
        let canonical_path = self
            .naming
            .canonical_path(table_id, self.kind, CURRENT_VERSION)?;
        let temp_path = self.naming.temp_path(table_id, self.kind)?;
        let stream = self
            .streams
            .output(&temp_path)
            .map_err(|e| Error::io(&temp_path, e))?;

        Ok(TableOutput {
            temp_path,
            canonical_path,
            stream,
            entries: 0,
        })
    }

    /// Delete current snapshots of tables outside this save
    fn retire_superseded(&self, committed: &[TableId], failures: &[TableFailure]) -> usize {
        let current = match cleanup::current_snapshots(self.naming.directory(), self.kind) {
            Ok(current) => current,
            Err(e) => {
                warn!("Could not list {} snapshots: {}", self.kind, e);
                return 0;
            }
        };

        let mut retired = 0;
        for (path, name) in current {
            let Some(table_id) = name.table_id() else {
                continue;
            };
            // a failed table keeps its previous snapshot
            if committed.contains(&table_id) || failures.iter().any(|f| f.table_id == table_id) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => retired += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {:?}: {}", path, e),
            }
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::catalog::InMemoryCatalog;
    use crate::naming::SnapshotFileName;
    use crate::stream::FsStreamFactory;
    use crate::testing::{FaultyStreams, RECORD_SIZE, TestKey, TestSerializer, entries_in};
    use tempfile::tempdir;

    struct Fixture {
        dir: tempfile::TempDir,
        catalog: Arc<InMemoryCatalog>,
        naming: Arc<SnapshotNaming>,
        cache: LruCache<TestKey, u64>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let catalog = Arc::new(InMemoryCatalog::new());
            let naming = Arc::new(SnapshotNaming::new(dir.path(), catalog.clone()));
            Self {
                dir,
                catalog,
                naming,
                cache: LruCache::new(1_000_000),
            }
        }

        fn fill(&self, table: TableId, ids: std::ops::Range<u64>) {
            for id in ids {
                self.cache.insert(TestKey::new(table, id), id * 10);
            }
        }

        fn writer(
            &self,
            keys_to_save: usize,
            streams: Arc<dyn StreamFactory>,
        ) -> SnapshotWriter<TestKey, u64, TestSerializer> {
            SnapshotWriter::new(
                CacheKind::KeyCache,
                &self.cache,
                keys_to_save,
                Arc::clone(&self.naming),
                Arc::new(TestSerializer::default()),
                streams,
            )
        }

        fn canonical(&self, table: TableId) -> PathBuf {
            self.naming
                .canonical_path(table, CacheKind::KeyCache, CURRENT_VERSION)
                .unwrap()
        }

        fn file_names(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn fs_streams() -> Arc<dyn StreamFactory> {
        Arc::new(FsStreamFactory)
    }

    #[test]
    fn test_save_partitions_by_table() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        let b = fx.catalog.create_table("ks", "b");
        fx.fill(a, 0..30);
        fx.fill(b, 0..20);

        let report = fx.writer(0, fs_streams()).save().unwrap();

        assert!(report.is_complete());
        assert_eq!(report.keys_written, 50);
        assert_eq!(report.tables_committed, 2);
        assert_eq!(entries_in(&fx.canonical(a)), 30);
        assert_eq!(entries_in(&fx.canonical(b)), 20);
        // no temp files survive a successful save
        assert_eq!(fx.file_names().len(), 2);
    }

    #[test]
    fn test_bounded_selection_uses_hot_keys() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        fx.fill(a, 0..100);
        for id in 90..100 {
            fx.cache.get(&TestKey::new(a, id));
        }

        let writer = fx.writer(10, fs_streams());
        assert_eq!(writer.progress().total, 10);
        let report = writer.save().unwrap();

        assert_eq!(report.keys_written, 10);
        let mut saved = crate::testing::read_ids(&fx.canonical(a));
        saved.sort_unstable();
        assert_eq!(saved, (90..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_cache_keeps_previous_snapshot() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        fx.fill(a, 0..5);
        fx.writer(0, fs_streams()).save().unwrap();

        fx.cache.clear();
        let stale = fx.dir.path().join("ks-a-KeyCache");
        fs::write(&stale, b"old").unwrap();

        let report = fx.writer(0, fs_streams()).save().unwrap();
        assert_eq!(report.keys_written, 0);
        assert_eq!(report.tables_committed, 0);
        assert!(!stale.exists());
        assert_eq!(entries_in(&fx.canonical(a)), 5);
    }

    #[test]
    fn test_dropped_table_is_skipped() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        let b = fx.catalog.create_table("ks", "b");
        fx.fill(a, 0..10);
        fx.fill(b, 0..10);

        let writer = fx.writer(0, fs_streams());
        // dropped after selection, before the write
        let b_name = fx.canonical(b);
        fx.catalog.drop_table(b);

        let report = writer.save().unwrap();
        assert!(report.is_complete());
        assert_eq!(report.keys_written, 10);
        assert_eq!(report.tables_committed, 1);
        assert!(fx.canonical(a).exists());
        assert!(!b_name.exists());
    }

    #[test]
    fn test_stale_cleanup_leaves_other_kinds() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        fx.fill(a, 0..3);

        let hex = a.to_hex();
        for name in [
            format!("ks-a-{hex}-KeyCache-a.db"),
            "ks-a-KeyCache".to_string(),
            format!("ks-a-{hex}-KeyCache-b.db.dead.tmp"),
            format!("ks-a-{hex}-RowCache-a.db"),
        ] {
            fs::write(fx.dir.path().join(name), b"junk").unwrap();
        }

        fx.writer(0, fs_streams()).save().unwrap();

        let names = fx.file_names();
        assert_eq!(
            names,
            vec![
                format!("ks-a-{hex}-KeyCache-b.db"),
                format!("ks-a-{hex}-RowCache-a.db"),
            ]
        );
    }

    #[test]
    fn test_untagged_snapshots_are_cleaned_whatever_the_version() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        fx.fill(a, 0..3);

        for name in ["ks-a-KeyCache-a.db", "ks-a-KeyCache-b.db", "ks-a-RowCache-a.db"] {
            fs::write(fx.dir.path().join(name), b"junk").unwrap();
        }

        fx.writer(0, fs_streams()).save().unwrap();

        let mut expected = vec![
            format!("ks-a-{}-KeyCache-b.db", a.to_hex()),
            "ks-a-RowCache-a.db".to_string(),
        ];
        expected.sort();
        assert_eq!(fx.file_names(), expected);
    }

    #[test]
    fn test_tables_outside_selection_are_retired() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        let b = fx.catalog.create_table("ks", "b");
        fx.fill(a, 0..10);
        fx.fill(b, 0..10);
        fx.writer(0, fs_streams()).save().unwrap();
        assert!(fx.canonical(b).exists());

        // only table a is hot now
        for id in 0..10 {
            fx.cache.get(&TestKey::new(a, id));
        }
        let report = fx.writer(10, fs_streams()).save().unwrap();

        assert_eq!(report.tables_committed, 1);
        assert_eq!(report.tables_retired, 1);
        assert!(fx.canonical(a).exists());
        assert!(!fx.canonical(b).exists());
    }

    #[test]
    fn test_open_failure_is_isolated_per_table() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        let b = fx.catalog.create_table("ks", "b");
        fx.fill(a, 0..10);
        fx.fill(b, 0..10);
        fx.writer(0, fs_streams()).save().unwrap();
        let previous_b = fs::read(fx.canonical(b)).unwrap();

        fx.fill(a, 10..20);
        fx.fill(b, 10..20);
        let streams = Arc::new(FaultyStreams::default().fail_open(b));
        let report = fx.writer(0, streams).save().unwrap();

        assert_eq!(report.tables_committed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].table_id, b);
        assert_eq!(report.failures[0].stage, FailureStage::Open);
        assert_eq!(entries_in(&fx.canonical(a)), 20);
        // the failed table keeps its last good snapshot
        assert_eq!(fs::read(fx.canonical(b)).unwrap(), previous_b);
    }

    #[test]
    fn test_encode_failure_abandons_temp_file() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        let b = fx.catalog.create_table("ks", "b");
        fx.fill(a, 0..10);
        fx.fill(b, 0..10);

        let streams = Arc::new(FaultyStreams::default().fail_writes(a));
        let report = fx.writer(0, streams).save().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Encode);
        assert!(matches!(report.failures[0].error, Error::WriteFailed { .. }));
        assert!(!fx.canonical(a).exists());
        assert_eq!(entries_in(&fx.canonical(b)), 10);

        let leftovers: Vec<String> = fx
            .file_names()
            .into_iter()
            .filter(|n| matches!(SnapshotFileName::parse(n), Some(SnapshotFileName::Temp { .. })))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_crash_before_rename_keeps_committed_snapshot() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        fx.fill(a, 0..10);
        fx.writer(0, fs_streams()).save().unwrap();
        let committed = fs::read(fx.canonical(a)).unwrap();

        fx.fill(a, 10..500);
        let streams: Arc<dyn StreamFactory> = Arc::new(FaultyStreams::default().crash_on_sync());
        let writer = fx.writer(0, streams);
        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| writer.save()));
        assert!(crashed.is_err());

        // the canonical file is the old, complete one
        assert_eq!(fs::read(fx.canonical(a)).unwrap(), committed);
        assert_eq!(committed.len() as u64 % RECORD_SIZE, 0);

        // and the next save cleans the half-written temp file up
        fx.writer(0, fs_streams()).save().unwrap();
        assert_eq!(entries_in(&fx.canonical(a)), 500);
        assert_eq!(fx.file_names().len(), 1);
    }

    #[test]
    fn test_progress_reports_written_keys() {
        let fx = Fixture::new();
        let a = fx.catalog.create_table("ks", "a");
        fx.fill(a, 0..25);

        let writer = fx.writer(0, fs_streams());
        let progress = writer.progress_handle();
        assert_eq!(progress.sample().completed, 0);
        writer.save().unwrap();

        let sample = progress.sample();
        assert_eq!((sample.completed, sample.total), (25, 25));
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("saved_caches");
        let catalog = Arc::new(InMemoryCatalog::new());
        let a = catalog.create_table("ks", "a");
        let naming = Arc::new(SnapshotNaming::new(&nested, catalog.clone()));
        let cache = LruCache::new(10);
        cache.insert(TestKey::new(a, 1), 10u64);

        let writer: SnapshotWriter<TestKey, u64, TestSerializer> = SnapshotWriter::new(
            CacheKind::KeyCache,
            &cache,
            0,
            naming,
            Arc::new(TestSerializer::default()),
            fs_streams(),
        );
        writer.save().unwrap();
        assert!(Path::new(&nested).is_dir());
    }
}
