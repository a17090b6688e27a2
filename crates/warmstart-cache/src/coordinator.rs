//! Per-kind snapshot coordination
//!
//! A [`CacheSnapshotCoordinator`] owns the save schedule of one cache kind,
//! submits saves to the blocking pool under flush exclusivity, and reloads
//! saved entries into the cache at startup.

use crate::cache::BoundedCache;
use crate::context::SnapshotContext;
use crate::flush::FlushCoordinator;
use crate::naming::SnapshotNaming;
use crate::serializer::{CacheKey, Hydration, SnapshotSerializer, TableHandle};
use crate::stream::StreamFactory;
use crate::writer::{SaveReport, SnapshotWriter};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use warmstart_common::{CURRENT_VERSION, CacheKind, CacheSaveConfig, Error, Result};

/// Outcome of reloading one table's snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    /// Entries inserted into the cache
    pub entries_loaded: usize,
    pub elapsed: Duration,
}

impl LoadResult {
    fn empty(start: Instant) -> Self {
        Self {
            entries_loaded: 0,
            elapsed: start.elapsed(),
        }
    }
}

/// A save running on the blocking pool
#[derive(Debug)]
pub struct SaveHandle {
    kind: CacheKind,
    handle: JoinHandle<Result<SaveReport>>,
}

impl SaveHandle {
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the save to finish
    pub async fn wait(self) -> Result<SaveReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::TaskFailed(format!("{} save: {e}", self.kind))),
        }
    }
}

/// Saves and reloads the contents of one cache kind
pub struct CacheSnapshotCoordinator<K, V, S> {
    kind: CacheKind,
    cache: Arc<dyn BoundedCache<K, V>>,
    serializer: Arc<S>,
    naming: Arc<SnapshotNaming>,
    streams: Arc<dyn StreamFactory>,
    flush: Arc<FlushCoordinator>,
    runtime: Handle,
    load_concurrency: usize,
    /// Periodic save timer, if armed
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V, S> CacheSnapshotCoordinator<K, V, S>
where
    K: CacheKey,
    V: Send + 'static,
    S: SnapshotSerializer<K, V>,
{
    pub fn new(
        kind: CacheKind,
        cache: Arc<dyn BoundedCache<K, V>>,
        serializer: Arc<S>,
        ctx: &SnapshotContext,
    ) -> Self {
        Self {
            kind,
            cache,
            serializer,
            naming: Arc::clone(&ctx.naming),
            streams: Arc::clone(&ctx.streams),
            flush: Arc::clone(&ctx.flush),
            runtime: ctx.runtime.clone(),
            load_concurrency: ctx.load_concurrency.max(1),
            timer: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn cache(&self) -> &Arc<dyn BoundedCache<K, V>> {
        &self.cache
    }

    /// Reload the saved entries of one table into the cache.
    ///
    /// A missing, truncated or corrupt snapshot never fails the load; the
    /// entries read before the damage are still inserted.
    pub async fn load_saved(&self, table: Arc<S::Table>) -> LoadResult {
        let start = Instant::now();
        let table_id = table.table_id();

        let path = match self
            .naming
            .canonical_path(table_id, self.kind, CURRENT_VERSION)
        {
            Ok(path) => path,
            Err(e) => {
                debug!("Not loading {} for table {}: {}", self.kind, table_id, e);
                return LoadResult::empty(start);
            }
        };
        if !path.exists() {
            debug!("No saved {} at {:?}", self.kind, path);
            return LoadResult::empty(start);
        }

        info!("Reading saved cache {:?}", path);
        let serializer = Arc::clone(&self.serializer);
        let streams = Arc::clone(&self.streams);
        let scan = self.runtime.spawn_blocking(move || {
            scan_snapshot::<K, V, S>(streams.as_ref(), &path, serializer.as_ref(), &table)
        });
        let hydrations = match scan.await {
            Ok((hydrations, damage)) => {
                if let Some(e) = damage {
                    debug!("Harmless error reading saved cache: {}", e);
                }
                hydrations
            }
            Err(e) => {
                warn!("Scan of saved {} for table {} failed: {}", self.kind, table_id, e);
                return LoadResult::empty(start);
            }
        };

        // acquire before spawning so at most load_concurrency hydrations run
        let semaphore = Arc::new(Semaphore::new(self.load_concurrency));
        let mut tasks = Vec::with_capacity(hydrations.len());
        for hydration in hydrations {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            tasks.push(self.runtime.spawn(async move {
                let entry = hydration.await;
                drop(permit);
                entry
            }));
        }

        let mut entries_loaded = 0;
        for task in tasks {
            match task.await {
                Ok(Some((key, value))) => {
                    self.cache.put(key, value);
                    entries_loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Hydration of a saved {} entry failed: {}", self.kind, e),
            }
        }

        let result = LoadResult {
            entries_loaded,
            elapsed: start.elapsed(),
        };
        info!(
            "Completed loading ({} ms; {} keys) {} cache",
            result.elapsed.as_millis(),
            entries_loaded,
            self.kind
        );
        result
    }

    /// Start a save on the blocking pool.
    ///
    /// Returns `None` without doing anything when a save of this kind is
    /// already running.
    pub fn submit_save(&self, keys_to_save: usize) -> Option<SaveHandle> {
        let Some(guard) = self.flush.try_begin_flush(self.kind) else {
            debug!("{} save already in progress, skipping", self.kind);
            return None;
        };

        let writer: SnapshotWriter<K, V, S> = SnapshotWriter::new(
            self.kind,
            self.cache.as_ref(),
            keys_to_save,
            Arc::clone(&self.naming),
            Arc::clone(&self.serializer),
            Arc::clone(&self.streams),
        );
        guard.track(writer.progress_handle());

        let handle = self.runtime.spawn_blocking(move || {
            // released on every exit, panics included
            let _guard = guard;
            writer.save()
        });
        Some(SaveHandle {
            kind: self.kind,
            handle,
        })
    }

    /// Save every `period`, replacing any previous schedule.
    ///
    /// A zero period only disarms, as does a period too long for the clock
    /// to represent. Running saves are never interrupted.
    pub fn schedule_saving(self: &Arc<Self>, period: Duration, keys_to_save: usize) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if period.is_zero() {
            debug!("Periodic {} saving disabled", self.kind);
            return;
        }
        // the ticker adds the period to each deadline, so two must fit
        let now = tokio::time::Instant::now();
        let Some(start) = now
            .checked_add(period)
            .filter(|start| start.checked_add(period).is_some())
        else {
            warn!(
                "{} save period {:?} is out of range, periodic saving disabled",
                self.kind, period
            );
            return;
        };

        let coordinator = Arc::downgrade(self);
        let kind = self.kind;
        *timer = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.submit_save(keys_to_save);
            }
            debug!("{} save timer stopped", kind);
        }));
        debug!("Scheduled {} saving every {:?}", self.kind, period);
    }

    /// Apply one kind's saving configuration
    pub fn schedule_from_config(self: &Arc<Self>, config: &CacheSaveConfig) {
        self.schedule_saving(
            config.save_period().unwrap_or(Duration::ZERO),
            config.keys_to_save,
        );
    }

    /// Check whether periodic saving is armed
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Disarm periodic saving
    pub fn shutdown(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
            debug!("Cancelled periodic {} saving", self.kind);
        }
    }
}

impl<K, V, S> Drop for CacheSnapshotCoordinator<K, V, S> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Decode records until the end of the file or the first error.
///
/// Returns what was decoded, plus the error that ended the scan early.
fn scan_snapshot<K, V, S>(
    streams: &dyn StreamFactory,
    path: &Path,
    serializer: &S,
    table: &S::Table,
) -> (Vec<Hydration<K, V>>, Option<Error>)
where
    S: SnapshotSerializer<K, V>,
{
    let mut hydrations = Vec::new();
    let input = match streams.input(path) {
        Ok(input) => input,
        Err(e) => return (hydrations, Some(Error::io(path, e))),
    };

    let mut reader = BufReader::new(input);
    let mut records = 0usize;
    loop {
        match reader.fill_buf() {
            Ok([]) => return (hydrations, None),
            Ok(_) => {}
            Err(e) => return (hydrations, Some(Error::io(path, e))),
        }
        records += 1;
        match serializer.decode(&mut reader, table) {
            Ok(Some(hydration)) => hydrations.push(hydration),
            Ok(None) => {}
            Err(e) => {
                let reason = format!("record {records} unreadable: {e}");
                return (hydrations, Some(Error::corrupt(path, reason)));
            }
        }
    }
}
