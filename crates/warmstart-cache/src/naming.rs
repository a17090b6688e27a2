//! Snapshot file naming
//!
//! Every snapshot lives directly in the saved caches directory:
//!
//! - canonical: `{keyspace}-{table}-{table_id_hex}-{Kind}-{version}.db`
//! - temp:      `{canonical}.{suffix}.tmp`
//! - legacy:    any name ending in the bare kind, e.g. `ks-users-KeyCache`
//! - untagged:  `{keyspace}-{table}-{Kind}-{version}.db`, written before
//!   table ids were part of the name
//!
//! Names are parsed from the right so keyspace and table names may
//! themselves contain dashes.

use crate::catalog::SchemaCatalog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use warmstart_common::{CURRENT_VERSION, CacheKind, Error, Result, TableId, TableName};

const SNAPSHOT_EXTENSION: &str = ".db";
const TEMP_EXTENSION: &str = ".tmp";

/// Build the canonical file name of a table's snapshot
#[must_use]
pub fn canonical_file_name(
    name: &TableName,
    table_id: TableId,
    kind: CacheKind,
    version: &str,
) -> String {
    format!(
        "{}-{}-{}-{}-{}{}",
        name.keyspace,
        name.table,
        table_id.to_hex(),
        kind,
        version,
        SNAPSHOT_EXTENSION
    )
}

/// A file name recognised as belonging to some cache kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotFileName {
    /// A committed snapshot
    Canonical {
        table_id: TableId,
        kind: CacheKind,
        version: String,
    },
    /// A write target that was never promoted
    Temp {
        table_id: TableId,
        kind: CacheKind,
        version: String,
    },
    /// Pre-versioning name carrying only the kind
    Legacy { kind: CacheKind },
    /// Versioned name without a table id
    Untagged { kind: CacheKind, version: String },
}

impl SnapshotFileName {
    /// Parse a bare file name (no directory)
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_suffix(TEMP_EXTENSION) {
            let (canonical, suffix) = rest.rsplit_once('.')?;
            if suffix.is_empty() {
                return None;
            }
            return match Self::parse_canonical(canonical)? {
                Self::Canonical {
                    table_id,
                    kind,
                    version,
                } => Some(Self::Temp {
                    table_id,
                    kind,
                    version,
                }),
                _ => None,
            };
        }

        if name.ends_with(SNAPSHOT_EXTENSION) {
            return Self::parse_canonical(name);
        }

        CacheKind::ALL
            .into_iter()
            .find(|kind| name.ends_with(kind.as_str()))
            .map(|kind| Self::Legacy { kind })
    }

    fn parse_canonical(name: &str) -> Option<Self> {
        let rest = name.strip_suffix(SNAPSHOT_EXTENSION)?;
        let (rest, version) = rest.rsplit_once('-')?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        let (rest, kind) = rest.rsplit_once('-').unwrap_or(("", rest));
        let kind = CacheKind::ALL.into_iter().find(|k| k.as_str() == kind)?;
        let version = version.to_string();

        let table_id = rest
            .rsplit_once('-')
            .filter(|(tables, _)| !tables.is_empty())
            .and_then(|(_, hex)| TableId::from_hex(hex));
        Some(match table_id {
            Some(table_id) => Self::Canonical {
                table_id,
                kind,
                version,
            },
            None => Self::Untagged { kind, version },
        })
    }

    #[must_use]
    pub fn kind(&self) -> CacheKind {
        match self {
            Self::Canonical { kind, .. }
            | Self::Temp { kind, .. }
            | Self::Legacy { kind }
            | Self::Untagged { kind, .. } => *kind,
        }
    }

    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        match self {
            Self::Canonical { table_id, .. } | Self::Temp { table_id, .. } => Some(*table_id),
            Self::Legacy { .. } | Self::Untagged { .. } => None,
        }
    }

    /// True for anything a save of this kind should delete up front
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self {
            Self::Canonical { version, .. } => version != CURRENT_VERSION,
            Self::Temp { .. } | Self::Legacy { .. } | Self::Untagged { .. } => true,
        }
    }

    /// True for a committed snapshot in the current format
    #[must_use]
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Canonical { version, .. } if version == CURRENT_VERSION)
    }
}

/// Maps tables and cache kinds to paths under the saved caches directory
pub struct SnapshotNaming {
    directory: PathBuf,
    catalog: Arc<dyn SchemaCatalog>,
}

impl SnapshotNaming {
    pub fn new(directory: impl Into<PathBuf>, catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self {
            directory: directory.into(),
            catalog,
        }
    }

    /// Saved caches directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Schema used to resolve table names
    pub fn catalog(&self) -> &dyn SchemaCatalog {
        self.catalog.as_ref()
    }

    /// Canonical snapshot path of a table.
    ///
    /// Fails with [`Error::UnknownTable`] once the table has been dropped.
    pub fn canonical_path(&self, table_id: TableId, kind: CacheKind, version: &str) -> Result<PathBuf> {
        let name = self
            .catalog
            .table_name(table_id)
            .ok_or(Error::UnknownTable(table_id))?;
        Ok(self
            .directory
            .join(canonical_file_name(&name, table_id, kind, version)))
    }

    /// Fresh temp path next to the table's current-version canonical path
    pub fn temp_path(&self, table_id: TableId, kind: CacheKind) -> Result<PathBuf> {
        let canonical = self.canonical_path(table_id, kind, CURRENT_VERSION)?;
        let mut name = canonical.into_os_string();
        name.push(format!(".{}{}", temp_suffix(), TEMP_EXTENSION));
        Ok(PathBuf::from(name))
    }

    /// Check whether a file name is a cleanup target for `kind`
    #[must_use]
    pub fn is_stale_file(name: &str, kind: CacheKind) -> bool {
        SnapshotFileName::parse(name).is_some_and(|parsed| parsed.kind() == kind && parsed.is_stale())
    }
}

fn temp_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(16);
    suffix
}
