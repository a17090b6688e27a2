//! Core type definitions for warmstart
//!
//! Identifiers for tables and cache kinds, and the format version tag
//! embedded in snapshot file names.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Format version tag of snapshot files written by this build.
///
/// Only files carrying this tag are read at load time; any other tag is a
/// cleanup target.
pub const CURRENT_VERSION: &str = "b";

/// Unique identifier for a table
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct TableId(Uuid);

impl TableId {
    /// Generate a new random table ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Lowercase hex form without dashes, as used in file names
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    /// Parse the 32-digit hex form produced by [`TableId::to_hex`]
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Uuid::parse_str(hex).ok().map(Self)
    }
}

impl Default for TableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keyspace and table name of a table, as resolved through the schema
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{keyspace}.{table}")]
pub struct TableName {
    pub keyspace: String,
    pub table: String,
}

impl TableName {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

/// Identity of a cache whose contents can be saved and reloaded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKind {
    /// Partition key to data file position cache
    KeyCache,
    /// Partition contents cache
    RowCache,
    /// Counter shard cache
    CounterCache,
}

impl CacheKind {
    /// Every kind, in declaration order
    pub const ALL: [CacheKind; 3] = [Self::KeyCache, Self::RowCache, Self::CounterCache];

    /// Name embedded in snapshot file names
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeyCache => "KeyCache",
            Self::RowCache => "RowCache",
            Self::CounterCache => "CounterCache",
        }
    }

    /// Operation type reported while a save of this kind runs
    #[must_use]
    pub const fn save_operation(&self) -> OperationType {
        match self {
            Self::KeyCache => OperationType::KeyCacheSave,
            Self::RowCache => OperationType::RowCacheSave,
            Self::CounterCache => OperationType::CounterCacheSave,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown cache kind name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache kind: {0}")]
pub struct UnknownCacheKind(pub String);

impl FromStr for CacheKind {
    type Err = UnknownCacheKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keycache" | "key" | "key_cache" => Ok(Self::KeyCache),
            "rowcache" | "row" | "row_cache" => Ok(Self::RowCache),
            "countercache" | "counter" | "counter_cache" => Ok(Self::CounterCache),
            _ => Err(UnknownCacheKind(s.to_string())),
        }
    }
}

/// Kind of background operation, for progress reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum OperationType {
    #[display("Key cache save")]
    KeyCacheSave,
    #[display("Row cache save")]
    RowCacheSave,
    #[display("Counter cache save")]
    CounterCacheSave,
}
