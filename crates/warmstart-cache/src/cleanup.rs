//! Stale snapshot cleanup
//!
//! Older format versions, legacy bare-kind names and temp files left by an
//! interrupted save are removed before each save of the same kind.

use crate::naming::{SnapshotFileName, SnapshotNaming};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use warmstart_common::{CacheKind, Error, Result};

/// List the stale files of one kind in the saved caches directory
pub fn stale_files(directory: &Path, kind: CacheKind) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory).map_err(|e| Error::io(directory, e))?;

    Ok(entries
        .filter_map(|entry| entry.ok())
        // someone else's directories are left alone
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| SnapshotNaming::is_stale_file(name, kind))
        })
        .map(|entry| entry.path())
        .collect())
}

/// Delete the stale files of one kind, returning how many were removed
pub fn delete_stale_files(directory: &Path, kind: CacheKind) -> Result<usize> {
    let mut removed = 0;
    for path in stale_files(directory, kind)? {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted stale {} file {:?}", kind, path);
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

/// Current-version snapshots of one kind, keyed by the file's table
pub fn current_snapshots(directory: &Path, kind: CacheKind) -> Result<Vec<(PathBuf, SnapshotFileName)>> {
    let entries = fs::read_dir(directory).map_err(|e| Error::io(directory, e))?;

    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let parsed = SnapshotFileName::parse(entry.file_name().to_str()?)?;
            (parsed.kind() == kind && parsed.is_current()).then(|| (entry.path(), parsed))
        })
        .collect())
}
