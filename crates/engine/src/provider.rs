//! Executor row provider over an MVCC snapshot.
//!
//! Every read funnels through the transaction manager, so scans and
//! index probes observe exactly the visibility the transaction's
//! isolation level dictates. Index probes read the `i/` keyspace; its
//! order-preserving value encoding makes range scans a byte-range
//! comparison.

use crate::catalog::{decode_row, TableCatalog};
use basalt_concurrency::TransactionManager;
use basalt_core::error::Result;
use basalt_core::types::{keys, TxnId};
use basalt_core::value::{DataType, Value};
use basalt_executor::{RangeBound, TableProvider};
use std::sync::Arc;

/// Table provider bound to one transaction.
pub struct SnapshotProvider {
    manager: Arc<TransactionManager>,
    catalog: Arc<TableCatalog>,
    tx_id: TxnId,
}

impl SnapshotProvider {
    pub fn new(
        manager: Arc<TransactionManager>,
        catalog: Arc<TableCatalog>,
        tx_id: TxnId,
    ) -> Self {
        SnapshotProvider {
            manager,
            catalog,
            tx_id,
        }
    }

    fn fetch_row(&self, table: &str, row_id: u64, width: usize) -> Result<Option<Vec<Value>>> {
        let key = keys::row_key(table, row_id);
        match self.manager.read(self.tx_id, &key)? {
            Some(bytes) => Ok(Some(decode_row(&bytes, width)?)),
            None => Ok(None),
        }
    }
}

impl TableProvider for SnapshotProvider {
    fn schema(&self, table: &str) -> Result<Vec<(String, DataType)>> {
        Ok(self.catalog.get(table)?.columns)
    }

    fn scan(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        let schema = self.catalog.get(table)?;
        let width = schema.columns.len();
        let rows = self.manager.scan(self.tx_id, &keys::table_prefix(table))?;
        rows.into_iter()
            .map(|(_, bytes)| decode_row(&bytes, width))
            .collect()
    }

    fn index_seek(&self, table: &str, column: &str, value: &Value) -> Result<Vec<Vec<Value>>> {
        let schema = self.catalog.get(table)?;
        let width = schema.columns.len();
        let prefix = keys::index_value_prefix(table, column, value);
        let mut out = Vec::new();
        for (key, _) in self.manager.scan(self.tx_id, &prefix)? {
            if let Some(row_id) = keys::row_id_of(&key) {
                if let Some(row) = self.fetch_row(table, row_id, width)? {
                    out.push(row);
                }
            }
        }
        Ok(out)
    }

    fn index_range(
        &self,
        table: &str,
        column: &str,
        low: RangeBound,
        high: RangeBound,
    ) -> Result<Vec<Vec<Value>>> {
        let schema = self.catalog.get(table)?;
        let width = schema.columns.len();
        let prefix = keys::index_prefix(table, column);
        let mut out = Vec::new();
        for (key, _) in self.manager.scan(self.tx_id, &prefix)? {
            // Entry layout: prefix | encoded value | '/' | row_id(8).
            let tail = &key[prefix.len()..];
            if tail.len() < 9 {
                continue;
            }
            let encoded = &tail[..tail.len() - 9];
            if !within(encoded, &low, &high) {
                continue;
            }
            if let Some(row_id) = keys::row_id_of(&key) {
                if let Some(row) = self.fetch_row(table, row_id, width)? {
                    out.push(row);
                }
            }
        }
        Ok(out)
    }
}

/// Compare an encoded index value against encoded bounds. Byte order
/// matches value order within a type, which is all an index on one
/// column ever stores.
fn within(encoded: &[u8], low: &RangeBound, high: &RangeBound) -> bool {
    let low_ok = match low {
        RangeBound::Unbounded => true,
        RangeBound::Inclusive(v) => encoded >= keys::encode_value(v).as_slice(),
        RangeBound::Exclusive(v) => encoded > keys::encode_value(v).as_slice(),
    };
    let high_ok = match high {
        RangeBound::Unbounded => true,
        RangeBound::Inclusive(v) => encoded <= keys::encode_value(v).as_slice(),
        RangeBound::Exclusive(v) => encoded < keys::encode_value(v).as_slice(),
    };
    low_ok && high_ok
}
