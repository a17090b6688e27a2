//! Shared services of the cache snapshot coordinators in one process

use crate::catalog::SchemaCatalog;
use crate::flush::FlushCoordinator;
use crate::naming::SnapshotNaming;
use crate::stream::{FsStreamFactory, StreamFactory};
use std::fs;
use std::sync::Arc;
use tokio::runtime::Handle;
use warmstart_common::{Error, Result, SnapshotConfig};

/// Everything coordinators of different cache kinds share
#[derive(Clone)]
pub struct SnapshotContext {
    pub(crate) naming: Arc<SnapshotNaming>,
    pub(crate) streams: Arc<dyn StreamFactory>,
    pub(crate) flush: Arc<FlushCoordinator>,
    pub(crate) runtime: Handle,
    pub(crate) load_concurrency: usize,
}

impl SnapshotContext {
    /// Build a context on the current tokio runtime.
    ///
    /// Creates the saved caches directory if it is missing.
    pub fn new(config: &SnapshotConfig, catalog: Arc<dyn SchemaCatalog>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::configuration(format!("no tokio runtime: {e}")))?;

        let directory = &config.saved_caches_directory;
        fs::create_dir_all(directory).map_err(|e| Error::io(directory, e))?;

        Ok(Self {
            naming: Arc::new(SnapshotNaming::new(directory.clone(), catalog)),
            streams: Arc::new(FsStreamFactory),
            flush: Arc::new(FlushCoordinator::new()),
            runtime,
            load_concurrency: config.load_concurrency,
        })
    }

    /// Replace the file system streams
    #[must_use]
    pub fn with_streams(mut self, streams: Arc<dyn StreamFactory>) -> Self {
        self.streams = streams;
        self
    }

    /// Run saves and hydrations on another runtime
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn naming(&self) -> &Arc<SnapshotNaming> {
        &self.naming
    }

    /// Flush registry shared by every coordinator built from this context
    pub fn flush(&self) -> &Arc<FlushCoordinator> {
        &self.flush
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_directory() {
        let dir = tempdir().unwrap();
        let config = SnapshotConfig::with_directory(dir.path().join("a/b"));

        let ctx = SnapshotContext::new(&config, Arc::new(InMemoryCatalog::new())).unwrap();
        assert!(ctx.naming().directory().is_dir());
        assert_eq!(ctx.load_concurrency, 64);
    }

    #[test]
    fn test_requires_runtime() {
        let dir = tempdir().unwrap();
        let config = SnapshotConfig::with_directory(dir.path());

        let result = SnapshotContext::new(&config, Arc::new(InMemoryCatalog::new()));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = SnapshotConfig {
            load_concurrency: 0,
            ..SnapshotConfig::default()
        };
        let result = SnapshotContext::new(&config, Arc::new(InMemoryCatalog::new()));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
