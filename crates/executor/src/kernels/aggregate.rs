//! Aggregate and group-by kernels.
//!
//! `Null` inputs are excluded from every aggregate except `COUNT(*)`,
//! which counts rows. `AVG` is the exact ratio of `SUM` to the non-null
//! count. Aggregating an empty input yields `Null` (or 0 for counts).

use super::resolve;
use basalt_core::ast::{AggregateFunc, ColumnRef};
use basalt_core::column::Column;
use basalt_core::error::{Error, Result};
use basalt_core::result::ResultSet;
use basalt_core::types::keys::encode_value;
use basalt_core::value::{DataType, Value};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Evaluate one aggregate over the given rows of `col`.
///
/// `col: None` is the `COUNT(*)` form; passing it to any other function
/// is a type error.
pub fn eval(func: AggregateFunc, col: Option<&Column>, rows: &[usize]) -> Result<Value> {
    let col = match (func, col) {
        (AggregateFunc::Count, None) => return Ok(Value::Integer(rows.len() as i64)),
        (_, Some(col)) => col,
        (f, None) => {
            return Err(Error::TypeMismatch(format!(
                "{f:?} requires a column argument"
            )))
        }
    };
    let non_null: Vec<Value> = rows
        .iter()
        .map(|&i| col.value(i))
        .filter(|v| !v.is_null())
        .collect();
    match func {
        AggregateFunc::Count => Ok(Value::Integer(non_null.len() as i64)),
        AggregateFunc::Sum => sum(&non_null, col.dtype),
        AggregateFunc::Avg => {
            if non_null.is_empty() {
                return Ok(Value::Null);
            }
            let total: f64 = non_null.iter().filter_map(|v| v.as_f64()).sum();
            Ok(Value::Float(total / non_null.len() as f64))
        }
        AggregateFunc::Min => Ok(extreme(&non_null, Ordering::Less)),
        AggregateFunc::Max => Ok(extreme(&non_null, Ordering::Greater)),
    }
}

fn sum(values: &[Value], dtype: DataType) -> Result<Value> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if dtype.is_integer() {
        let mut total: i64 = 0;
        for v in values {
            match v {
                Value::Integer(i) => {
                    total = total.checked_add(*i).ok_or_else(|| {
                        Error::TypeMismatch("integer SUM overflow".to_string())
                    })?;
                }
                other => {
                    return Err(Error::TypeMismatch(format!(
                        "SUM over integer column saw {other:?}"
                    )))
                }
            }
        }
        Ok(Value::Integer(total))
    } else {
        let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
        Ok(Value::Float(total))
    }
}

fn extreme(values: &[Value], keep: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for v in values {
        best = match best {
            None => Some(v),
            Some(b) => {
                if v.sql_cmp(b) == Some(keep) {
                    Some(v)
                } else {
                    Some(b)
                }
            }
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

/// Output column type of an aggregate over a column of `input` type.
pub fn output_type(func: AggregateFunc, input: Option<DataType>) -> DataType {
    match func {
        AggregateFunc::Count => DataType::Int64,
        AggregateFunc::Avg => DataType::Float64,
        AggregateFunc::Sum => match input {
            Some(t) if t.is_integer() => DataType::Int64,
            _ => DataType::Float64,
        },
        AggregateFunc::Min | AggregateFunc::Max => input.unwrap_or(DataType::Int64),
    }
}

fn output_name(func: AggregateFunc, col: &Option<ColumnRef>) -> String {
    let func_name = match func {
        AggregateFunc::Sum => "sum",
        AggregateFunc::Count => "count",
        AggregateFunc::Min => "min",
        AggregateFunc::Max => "max",
        AggregateFunc::Avg => "avg",
    };
    match col {
        Some(c) => format!("{func_name}({})", c.column),
        None => format!("{func_name}(*)"),
    }
}

/// Whole-input aggregation: one output row.
pub fn aggregate(
    batch: &ResultSet,
    aggs: &[(AggregateFunc, Option<ColumnRef>)],
) -> Result<ResultSet> {
    let rows: Vec<usize> = (0..batch.row_count).collect();
    let mut columns = Vec::with_capacity(aggs.len());
    for (func, col_ref) in aggs {
        let col = col_ref
            .as_ref()
            .map(|c| resolve(batch, c))
            .transpose()?;
        let value = eval(*func, col, &rows)?;
        let dtype = output_type(*func, col.map(|c| c.dtype));
        let mut out = Column::new(output_name(*func, col_ref), dtype);
        out.push(&value)?;
        columns.push(out);
    }
    ResultSet::from_columns(columns)
}

/// Partition by key equality, aggregate each group. Output rows appear in
/// first-seen group order: key columns first, then aggregates.
pub fn group_by(
    batch: &ResultSet,
    keys: &[ColumnRef],
    aggs: &[(AggregateFunc, Option<ColumnRef>)],
) -> Result<ResultSet> {
    let key_cols = keys
        .iter()
        .map(|k| resolve(batch, k))
        .collect::<Result<Vec<_>>>()?;

    let mut groups: FxHashMap<Vec<u8>, usize> = FxHashMap::default();
    let mut group_rows: Vec<Vec<usize>> = Vec::new();
    for i in 0..batch.row_count {
        let mut key = Vec::new();
        for col in &key_cols {
            key.extend_from_slice(&encode_value(&col.value(i)));
            key.push(0xFE);
        }
        let slot = *groups.entry(key).or_insert_with(|| {
            group_rows.push(Vec::new());
            group_rows.len() - 1
        });
        group_rows[slot].push(i);
    }

    let mut columns = Vec::new();
    for (key_ref, key_col) in keys.iter().zip(&key_cols) {
        let mut out = Column::new(key_ref.column.clone(), key_col.dtype);
        for rows in &group_rows {
            out.push(&key_col.value(rows[0]))?;
        }
        columns.push(out);
    }
    for (func, col_ref) in aggs {
        let col = col_ref
            .as_ref()
            .map(|c| resolve(batch, c))
            .transpose()?;
        let dtype = output_type(*func, col.map(|c| c.dtype));
        let mut out = Column::new(output_name(*func, col_ref), dtype);
        for rows in &group_rows {
            out.push(&eval(*func, col, rows)?)?;
        }
        columns.push(out);
    }
    ResultSet::from_columns(columns)
}
