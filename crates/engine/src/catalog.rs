//! Table catalog.
//!
//! Schemas and index definitions live in the storage tree under the
//! `s/` and `x/` prefixes, so DDL flows through the same transactional
//! WAL path as data and survives crashes. An in-memory mirror serves
//! lookups; it is rebuilt from storage at open and updated on each DDL
//! commit.
//!
//! Row payloads are bincode-encoded `Vec<Value>` in schema column order.
//! Rows written before an `ALTER TABLE ADD COLUMN` decode short and are
//! padded with `Null`.

use basalt_core::ast::IndexKind;
use basalt_core::error::{Error, Result};
use basalt_core::types::{keys, RowId};
use basalt_core::value::{DataType, Value};
use basalt_planner::SchemaProvider;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Persisted table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// `(column name, type)` in storage order
    pub columns: Vec<(String, DataType)>,
}

impl TableSchema {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == column)
    }

    pub fn column_type(&self, column: &str) -> Option<DataType> {
        self.columns
            .iter()
            .find(|(n, _)| n == column)
            .map(|(_, t)| *t)
    }
}

/// Persisted index definition (mirrors the planner registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub table: String,
    pub column: String,
    pub kind: IndexKind,
}

/// Key under which an index definition is stored.
pub fn index_meta_key(name: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(name.len() + 2);
    k.extend_from_slice(b"x/");
    k.extend_from_slice(name.as_bytes());
    k
}

/// Prefix of all index definitions.
pub fn index_meta_prefix() -> Vec<u8> {
    b"x/".to_vec()
}

/// In-memory catalog mirror with per-table row-id allocators.
#[derive(Default)]
pub struct TableCatalog {
    tables: DashMap<String, TableSchema>,
    next_row_id: DashMap<String, AtomicU64>,
}

impl TableCatalog {
    pub fn new() -> Self {
        TableCatalog::default()
    }

    /// Register a schema in the mirror, seeding the row-id allocator.
    pub fn install(&self, schema: TableSchema, next_row_id: RowId) {
        self.next_row_id
            .insert(schema.name.clone(), AtomicU64::new(next_row_id));
        self.tables.insert(schema.name.clone(), schema);
    }

    pub fn remove(&self, table: &str) {
        self.tables.remove(table);
        self.next_row_id.remove(table);
    }

    pub fn get(&self, table: &str) -> Result<TableSchema> {
        self.tables
            .get(table)
            .map(|s| s.clone())
            .ok_or_else(|| Error::UnknownRelation(table.to_string()))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    /// Allocate the next row id for a table.
    pub fn allocate_row_id(&self, table: &str) -> Result<RowId> {
        let counter = self
            .next_row_id
            .get(table)
            .ok_or_else(|| Error::UnknownRelation(table.to_string()))?;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Replace a schema in the mirror (ALTER TABLE), keeping the row-id
    /// allocator.
    pub fn replace(&self, schema: TableSchema) {
        self.tables.insert(schema.name.clone(), schema);
    }
}

impl SchemaProvider for TableCatalog {
    fn table_exists(&self, table: &str) -> bool {
        self.contains(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .map(|s| s.column_index(column).is_some())
            .unwrap_or(false)
    }
}

/// Encode a row for storage.
pub fn encode_row(values: &[Value]) -> Result<Vec<u8>> {
    bincode::serialize(values).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a row, padding with `Null` to `width` columns.
pub fn decode_row(bytes: &[u8], width: usize) -> Result<Vec<Value>> {
    let mut values: Vec<Value> =
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
    if values.len() > width {
        values.truncate(width);
    }
    while values.len() < width {
        values.push(Value::Null);
    }
    Ok(values)
}

/// Loose type admission: `Null` anywhere, integers into integer-family
/// and timestamp columns, floats into float columns, and so on.
pub fn value_admissible(value: &Value, dtype: DataType) -> bool {
    match value {
        Value::Null => true,
        Value::Boolean(_) => dtype == DataType::Bool,
        Value::Integer(_) => {
            dtype.is_integer() || matches!(dtype, DataType::Date32 | DataType::TimestampMicros)
        }
        Value::Float(_) => matches!(dtype, DataType::Float32 | DataType::Float64),
        Value::Text(_) => dtype == DataType::Utf8,
    }
}

/// Highest allocated row id for a table, derived from the stored keys.
pub fn max_row_id(pairs: &[(Vec<u8>, Vec<u8>)]) -> RowId {
    pairs
        .iter()
        .filter_map(|(k, _)| keys::row_id_of(k))
        .max()
        .map(|id| id + 1)
        .unwrap_or(0)
}
