//! Result sets.
//!
//! The executor produces columnar batches (kernel I/O); clients consume
//! row-wise output. `ResultSet` admits both shapes and converts between
//! them without losing `Null` information.

use crate::column::Column;
use crate::error::{Error, Result};
use crate::value::{DataType, Value};

/// Ordered collection of columns with a logical row count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// Output columns, in projection order
    pub columns: Vec<Column>,
    /// Logical row count (equal across all columns)
    pub row_count: usize,
}

impl ResultSet {
    /// An empty result (no columns, no rows).
    pub fn empty() -> Self {
        ResultSet::default()
    }

    /// Build from columns, checking that row counts agree.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let row_count = columns.first().map(|c| c.row_count).unwrap_or(0);
        for c in &columns {
            if c.row_count != row_count {
                return Err(Error::StorageCorruption(format!(
                    "column {} has {} rows, expected {}",
                    c.name, c.row_count, row_count
                )));
            }
            c.validate()?;
        }
        Ok(ResultSet { columns, row_count })
    }

    /// Build from row-wise values against a schema.
    pub fn from_rows(
        schema: &[(String, DataType)],
        rows: &[Vec<Value>],
    ) -> Result<Self> {
        let mut columns: Vec<Column> = schema
            .iter()
            .map(|(name, dtype)| Column::new(name.clone(), *dtype))
            .collect();
        for row in rows {
            if row.len() != columns.len() {
                return Err(Error::ConstraintViolation(format!(
                    "row has {} values, schema has {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            for (col, value) in columns.iter_mut().zip(row) {
                col.push(value)?;
            }
        }
        ResultSet::from_columns(columns)
    }

    /// Convert to row-wise form for client emission.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.row_count)
            .map(|i| self.columns.iter().map(|c| c.value(i)).collect())
            .collect()
    }

    /// Column names in projection order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}
