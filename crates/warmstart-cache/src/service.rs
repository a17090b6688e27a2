//! Process-wide snapshot service
//!
//! Holds one coordinator per cache kind, applies the configured save
//! schedules, and saves every kind on shutdown.

use crate::catalog::SchemaCatalog;
use crate::context::SnapshotContext;
use crate::coordinator::{CacheSnapshotCoordinator, SaveHandle};
use crate::progress::ProgressSample;
use crate::serializer::{CacheKey, SnapshotSerializer};
use crate::writer::SaveReport;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use warmstart_common::{CacheKind, CacheSaveConfig, Result, SnapshotConfig};

/// Type-erased view of a coordinator
pub trait ManagedSnapshots: Send + Sync {
    fn kind(&self) -> CacheKind;

    /// Start a save unless one of this kind is already running
    fn submit_save(&self, keys_to_save: usize) -> Option<SaveHandle>;

    /// Arm (or disarm) periodic saving from configuration
    fn schedule(self: Arc<Self>, config: &CacheSaveConfig);

    fn disarm(&self);

    fn is_scheduled(&self) -> bool;
}

impl<K, V, S> ManagedSnapshots for CacheSnapshotCoordinator<K, V, S>
where
    K: CacheKey,
    V: Send + 'static,
    S: SnapshotSerializer<K, V>,
{
    fn kind(&self) -> CacheKind {
        self.kind()
    }

    fn submit_save(&self, keys_to_save: usize) -> Option<SaveHandle> {
        self.submit_save(keys_to_save)
    }

    fn schedule(self: Arc<Self>, config: &CacheSaveConfig) {
        self.schedule_from_config(config);
    }

    fn disarm(&self) {
        self.shutdown();
    }

    fn is_scheduled(&self) -> bool {
        self.is_scheduled()
    }
}

/// Cache snapshot management for a whole process
pub struct SnapshotService {
    config: SnapshotConfig,
    ctx: SnapshotContext,
    coordinators: RwLock<BTreeMap<CacheKind, Arc<dyn ManagedSnapshots>>>,
}

impl SnapshotService {
    /// Create the service on the current tokio runtime
    pub fn new(config: SnapshotConfig, catalog: Arc<dyn SchemaCatalog>) -> Result<Self> {
        let ctx = SnapshotContext::new(&config, catalog)?;
        Ok(Self::with_context(config, ctx))
    }

    pub fn with_context(config: SnapshotConfig, ctx: SnapshotContext) -> Self {
        Self {
            config,
            ctx,
            coordinators: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Context to build coordinators with
    pub fn context(&self) -> &SnapshotContext {
        &self.ctx
    }

    /// Register the coordinator of a kind, replacing any earlier one
    pub fn register(&self, coordinator: Arc<dyn ManagedSnapshots>) {
        let kind = coordinator.kind();
        if let Some(previous) = self.coordinators.write().insert(kind, coordinator) {
            previous.disarm();
        }
    }

    pub fn get(&self, kind: CacheKind) -> Option<Arc<dyn ManagedSnapshots>> {
        self.coordinators.read().get(&kind).cloned()
    }

    fn registered(&self) -> Vec<Arc<dyn ManagedSnapshots>> {
        self.coordinators.read().values().cloned().collect()
    }

    /// Apply the configured save period of every registered kind
    pub fn schedule_all(&self) {
        for coordinator in self.registered() {
            let config = *self.config.for_kind(coordinator.kind());
            coordinator.schedule(&config);
        }
    }

    /// Save every registered kind and wait for the saves to finish.
    ///
    /// Kinds with a save already in flight are skipped.
    pub async fn save_all(&self) -> Vec<(CacheKind, Result<SaveReport>)> {
        let handles: Vec<SaveHandle> = self
            .registered()
            .into_iter()
            .filter_map(|coordinator| {
                let keys_to_save = self.config.for_kind(coordinator.kind()).keys_to_save;
                coordinator.submit_save(keys_to_save)
            })
            .collect();

        join_all(handles.into_iter().map(|handle| async move {
            let kind = handle.kind();
            let result = handle.wait().await;
            if let Err(e) = &result {
                warn!("Failed to save {}: {}", kind, e);
            }
            (kind, result)
        }))
        .await
    }

    /// Progress of the saves currently running
    pub fn active_saves(&self) -> Vec<ProgressSample> {
        self.ctx.flush().active_saves()
    }

    /// Disarm every save schedule
    pub fn shutdown(&self) {
        for coordinator in self.registered() {
            coordinator.disarm();
        }
        info!("Cache snapshot scheduling stopped");
    }
}
