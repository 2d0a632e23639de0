//! Operator kernels.
//!
//! Kernels are pure functions from columnar batches to columnar batches.
//! They never allocate device memory or touch storage; staging for the
//! accelerator path happens in `accel` and the same kernel code runs on
//! the staged buffers.

pub mod aggregate;
pub mod filter;
pub mod join;
pub mod sort;
pub mod window;

use basalt_core::ast::ColumnRef;
use basalt_core::column::Column;
use basalt_core::error::{Error, Result};
use basalt_core::result::ResultSet;

/// Find the batch column a reference names.
///
/// Resolution order: exact bare match, exact qualified match
/// (`table.column`), then suffix match on `.column` for join outputs.
pub fn resolve<'a>(batch: &'a ResultSet, col: &ColumnRef) -> Result<&'a Column> {
    if let Some(table) = &col.table {
        let qualified = format!("{table}.{}", col.column);
        if let Some(c) = batch.column(&qualified) {
            return Ok(c);
        }
    }
    if let Some(c) = batch.column(&col.column) {
        return Ok(c);
    }
    let suffix = format!(".{}", col.column);
    if let Some(c) = batch.columns.iter().find(|c| c.name.ends_with(&suffix)) {
        return Ok(c);
    }
    Err(Error::UnknownColumn {
        table: col.table.clone().unwrap_or_default(),
        column: col.column.clone(),
    })
}

/// Materialize the subset of rows named by `keep`, preserving order.
pub fn take(batch: &ResultSet, keep: &[usize]) -> Result<ResultSet> {
    let mut columns = Vec::with_capacity(batch.columns.len());
    for col in &batch.columns {
        let mut out = Column::new(col.name.clone(), col.dtype);
        for &i in keep {
            out.push(&col.value(i))?;
        }
        columns.push(out);
    }
    ResultSet::from_columns(columns)
}

#[cfg(test)]
pub(crate) mod testutil {
    use basalt_core::column::Column;
    use basalt_core::result::ResultSet;
    use basalt_core::value::{DataType, Value};

    pub fn int_column(name: &str, values: &[Option<i64>]) -> Column {
        let vals: Vec<Value> = values
            .iter()
            .map(|v| v.map(Value::Integer).unwrap_or(Value::Null))
            .collect();
        Column::from_values(name, DataType::Int64, &vals).unwrap()
    }

    pub fn text_column(name: &str, values: &[Option<&str>]) -> Column {
        let vals: Vec<Value> = values
            .iter()
            .map(|v| v.map(Value::text).unwrap_or(Value::Null))
            .collect();
        Column::from_values(name, DataType::Utf8, &vals).unwrap()
    }

    pub fn batch(columns: Vec<Column>) -> ResultSet {
        ResultSet::from_columns(columns).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use basalt_core::value::Value;

    #[test]
    fn test_resolve_bare_and_qualified() {
        let b = batch(vec![int_column("users.id", &[Some(1)])]);
        let by_qualified = resolve(&b, &ColumnRef::qualified("users", "id")).unwrap();
        assert_eq!(by_qualified.name, "users.id");
        let by_suffix = resolve(&b, &ColumnRef::bare("id")).unwrap();
        assert_eq!(by_suffix.name, "users.id");
    }

    #[test]
    fn test_resolve_unknown_errors() {
        let b = batch(vec![int_column("id", &[Some(1)])]);
        assert!(resolve(&b, &ColumnRef::bare("nope")).is_err());
    }

    #[test]
    fn test_take_preserves_order_and_nulls() {
        let b = batch(vec![int_column("n", &[Some(1), None, Some(3)])]);
        let out = take(&b, &[2, 1]).unwrap();
        assert_eq!(out.row_count, 2);
        assert_eq!(out.columns[0].value(0), Value::Integer(3));
        assert_eq!(out.columns[0].value(1), Value::Null);
    }
}
