//! Test fixtures shared by the engine's unit tests

use crate::naming::SnapshotFileName;
use crate::serializer::{CacheKey, Hydration, SnapshotSerializer, TableHandle};
use crate::stream::{FsStreamFactory, SnapshotOutput, StreamFactory};
use futures::FutureExt;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;
use warmstart_common::TableId;

/// Bytes per saved key: table uuid then little-endian id
pub const RECORD_SIZE: u64 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TestKey {
    pub table_id: TableId,
    pub id: u64,
}

impl TestKey {
    pub fn new(table_id: TableId, id: u64) -> Self {
        Self { table_id, id }
    }
}

impl CacheKey for TestKey {
    fn table_id(&self) -> TableId {
        self.table_id
    }
}

pub struct TestTable {
    pub table_id: TableId,
}

impl TableHandle for TestTable {
    fn table_id(&self) -> TableId {
        self.table_id
    }
}

/// Values hydrate to `id * 10`; ids in `missing` no longer resolve
#[derive(Default)]
pub struct TestSerializer {
    pub missing: HashSet<u64>,
    pub hydrate_delay: Option<Duration>,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl TestSerializer {
    pub fn with_missing(missing: impl IntoIterator<Item = u64>) -> Self {
        Self {
            missing: missing.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            hydrate_delay: Some(delay),
            ..Self::default()
        }
    }
}

impl SnapshotSerializer<TestKey, u64> for TestSerializer {
    type Table = TestTable;

    fn encode(&self, key: &TestKey, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(key.table_id.as_uuid().as_bytes())?;
        out.write_all(&key.id.to_le_bytes())
    }

    fn decode(
        &self,
        input: &mut dyn Read,
        table: &TestTable,
    ) -> io::Result<Option<Hydration<TestKey, u64>>> {
        let mut uuid = [0u8; 16];
        input.read_exact(&mut uuid)?;
        let mut id = [0u8; 8];
        input.read_exact(&mut id)?;

        let table_id = TableId::from_uuid(Uuid::from_bytes(uuid));
        if table_id != table.table_id {
            return Ok(None);
        }
        let id = u64::from_le_bytes(id);
        let resolves = !self.missing.contains(&id);
        let delay = self.hydrate_delay;
        let running = Arc::clone(&self.running);
        let peak = Arc::clone(&self.peak);

        Ok(Some(
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                running.fetch_sub(1, Ordering::SeqCst);
                resolves.then(|| (TestKey::new(table_id, id), id * 10))
            }
            .boxed(),
        ))
    }
}

/// Number of keys in a snapshot file
pub fn entries_in(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len() / RECORD_SIZE
}

/// Key ids stored in a snapshot file, in file order
pub fn read_ids(path: &Path) -> Vec<u64> {
    fs::read(path)
        .unwrap()
        .chunks_exact(RECORD_SIZE as usize)
        .map(|record| u64::from_le_bytes(record[16..24].try_into().unwrap()))
        .collect()
}

/// File system streams with injectable failures
#[derive(Default)]
pub struct FaultyStreams {
    fail_open: Option<TableId>,
    fail_writes: Option<TableId>,
    crash_on_sync: bool,
}

impl FaultyStreams {
    /// Refuse to create outputs for one table
    pub fn fail_open(mut self, table_id: TableId) -> Self {
        self.fail_open = Some(table_id);
        self
    }

    /// Accept outputs for one table but fail every write to them
    pub fn fail_writes(mut self, table_id: TableId) -> Self {
        self.fail_writes = Some(table_id);
        self
    }

    /// Panic when an output is synced, as if the process died before commit
    pub fn crash_on_sync(mut self) -> Self {
        self.crash_on_sync = true;
        self
    }
}

fn table_of(path: &Path) -> Option<TableId> {
    SnapshotFileName::parse(path.file_name()?.to_str()?)?.table_id()
}

impl StreamFactory for FaultyStreams {
    fn output(&self, path: &Path) -> io::Result<Box<dyn SnapshotOutput>> {
        let table = table_of(path);
        if table.is_some() && table == self.fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected open failure"));
        }
        Ok(Box::new(FaultyOutput {
            inner: FsStreamFactory.output(path)?,
            fail_writes: table.is_some() && table == self.fail_writes,
            crash_on_sync: self.crash_on_sync,
        }))
    }

    fn input(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        FsStreamFactory.input(path)
    }
}

struct FaultyOutput {
    inner: Box<dyn SnapshotOutput>,
    fail_writes: bool,
    crash_on_sync: bool,
}

impl Write for FaultyOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::other("injected write failure"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl SnapshotOutput for FaultyOutput {
    fn sync(&mut self) -> io::Result<()> {
        // push buffered bytes out so the crash leaves a partial temp file
        self.inner.flush()?;
        assert!(!self.crash_on_sync, "simulated crash before commit");
        self.inner.sync()
    }
}
