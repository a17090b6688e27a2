//! Snapshot file streams
//!
//! All snapshot I/O goes through a [`StreamFactory`] so tests and embedders
//! can wrap or replace the file system.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Output stream for one temp snapshot file
pub trait SnapshotOutput: Write + Send {
    /// Flush buffered bytes and force them to stable storage
    fn sync(&mut self) -> io::Result<()>;
}

/// Opens snapshot files for writing and reading
pub trait StreamFactory: Send + Sync {
    /// Create (or truncate) a file for writing
    fn output(&self, path: &Path) -> io::Result<Box<dyn SnapshotOutput>>;

    /// Open a snapshot for reading
    fn input(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// Buffered file output
pub struct FileOutput {
    writer: BufWriter<File>,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl SnapshotOutput for FileOutput {
    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

/// Plain file system streams
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStreamFactory;

impl StreamFactory for FsStreamFactory {
    fn output(&self, path: &Path) -> io::Result<Box<dyn SnapshotOutput>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(FileOutput {
            writer: BufWriter::new(file),
        }))
    }

    fn input(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}
