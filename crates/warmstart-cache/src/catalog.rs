//! Schema catalog lookups
//!
//! The snapshot engine only needs to know whether a table still exists and
//! what it is called; the catalog itself belongs to the surrounding engine.

use dashmap::DashMap;
use warmstart_common::{TableId, TableName};

/// Resolves table identities against the live schema
pub trait SchemaCatalog: Send + Sync {
    /// Keyspace and table name, or `None` once the table is dropped
    fn table_name(&self, id: TableId) -> Option<TableName>;

    /// Check whether the table is still part of the schema
    fn contains(&self, id: TableId) -> bool {
        self.table_name(id).is_some()
    }
}

/// Catalog backed by a concurrent map, for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: DashMap<TableId, TableName>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under a known id
    pub fn register(&self, id: TableId, name: TableName) {
        self.tables.insert(id, name);
    }

    /// Register a new table and return its generated id
    pub fn create_table(&self, keyspace: &str, table: &str) -> TableId {
        let id = TableId::new();
        self.register(id, TableName::new(keyspace, table));
        id
    }

    /// Remove a table from the schema
    pub fn drop_table(&self, id: TableId) -> Option<TableName> {
        self.tables.remove(&id).map(|(_, name)| name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SchemaCatalog for InMemoryCatalog {
    fn table_name(&self, id: TableId) -> Option<TableName> {
        self.tables.get(&id).map(|entry| entry.value().clone())
    }

    fn contains(&self, id: TableId) -> bool {
        self.tables.contains_key(&id)
    }
}
