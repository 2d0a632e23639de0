//! Row source contract between the executor and the engine.

use basalt_core::error::Result;
use basalt_core::value::{DataType, Value};

/// One end of an index range.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Unbounded,
    Inclusive(Value),
    Exclusive(Value),
}

/// Supplies schemas and rows for scans. Implemented by the engine over a
/// transaction snapshot, so all reads observe MVCC visibility.
pub trait TableProvider: Send + Sync {
    /// Column names and types in storage order.
    fn schema(&self, table: &str) -> Result<Vec<(String, DataType)>>;

    /// Every visible row, in row-id (insertion) order.
    fn scan(&self, table: &str) -> Result<Vec<Vec<Value>>>;

    /// Rows where `column == value`, served through the named index.
    fn index_seek(&self, table: &str, column: &str, value: &Value) -> Result<Vec<Vec<Value>>>;

    /// Rows where `column` falls in the bound range, in index order.
    fn index_range(
        &self,
        table: &str,
        column: &str,
        low: RangeBound,
        high: RangeBound,
    ) -> Result<Vec<Vec<Value>>>;
}
