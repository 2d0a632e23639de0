//! Filter kernel.
//!
//! Evaluates a conjunction of simple predicates over a batch and keeps
//! the rows where every predicate is true. Order is preserved; rows where
//! any predicate evaluates to false *or Null* are dropped, per SQL
//! three-valued logic.

use super::{resolve, take};
use basalt_core::ast::{CompareOp, Predicate};
use basalt_core::column::Column;
use basalt_core::error::Result;
use basalt_core::result::ResultSet;
use basalt_core::value::Value;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Evaluate one predicate against one value; `Null` comparisons fail.
/// Public because the engine's UPDATE/DELETE paths evaluate predicates
/// row-wise without building a batch.
pub fn matches(pred: &Predicate, value: &Value) -> bool {
    match pred.op {
        CompareOp::Eq => value.sql_eq(&pred.value).unwrap_or(false),
        CompareOp::NotEq => value.sql_eq(&pred.value).map(|b| !b).unwrap_or(false),
        CompareOp::Lt => cmp_is(value, &pred.value, |o| o == Ordering::Less),
        CompareOp::LtEq => cmp_is(value, &pred.value, |o| o != Ordering::Greater),
        CompareOp::Gt => cmp_is(value, &pred.value, |o| o == Ordering::Greater),
        CompareOp::GtEq => cmp_is(value, &pred.value, |o| o != Ordering::Less),
        CompareOp::Between => {
            let low_ok = cmp_is(value, &pred.value, |o| o != Ordering::Less);
            let high_ok = pred
                .value2
                .as_ref()
                .map(|high| cmp_is(value, high, |o| o != Ordering::Greater))
                .unwrap_or(false);
            low_ok && high_ok
        }
        CompareOp::Like => like_match(value, &pred.value),
    }
}

fn cmp_is(a: &Value, b: &Value, f: impl Fn(Ordering) -> bool) -> bool {
    a.sql_cmp(b).map(f).unwrap_or(false)
}

/// SQL LIKE with `%` (any run) and `_` (any single byte).
fn like_match(value: &Value, pattern: &Value) -> bool {
    let (Value::Text(v), Value::Text(p)) = (value, pattern) else {
        return false;
    };
    like_bytes(v, p)
}

fn like_bytes(v: &[u8], p: &[u8]) -> bool {
    match p.first() {
        None => v.is_empty(),
        Some(b'%') => {
            // Greedy-or-empty: try consuming 0..=len input bytes.
            (0..=v.len()).any(|i| like_bytes(&v[i..], &p[1..]))
        }
        Some(b'_') => !v.is_empty() && like_bytes(&v[1..], &p[1..]),
        Some(&c) => v.first() == Some(&c) && like_bytes(&v[1..], &p[1..]),
    }
}

/// Apply `preds` (conjunction) to `batch`. `parallel_degree > 1` splits
/// mask evaluation across a rayon pool.
pub fn filter(batch: &ResultSet, preds: &[Predicate], parallel_degree: usize) -> Result<ResultSet> {
    if preds.is_empty() {
        return Ok(batch.clone());
    }
    let columns: Vec<&Column> = preds
        .iter()
        .map(|p| resolve(batch, &p.column))
        .collect::<Result<Vec<_>>>()?;

    let row_matches = |i: usize| -> bool {
        preds
            .iter()
            .zip(&columns)
            .all(|(pred, col)| matches(pred, &col.value(i)))
    };

    let keep: Vec<usize> = if parallel_degree > 1 && batch.row_count > 1 {
        let chunk = batch.row_count.div_ceil(parallel_degree);
        let mut chunks: Vec<Vec<usize>> = (0..batch.row_count)
            .collect::<Vec<_>>()
            .par_chunks(chunk.max(1))
            .map(|rows| rows.iter().copied().filter(|&i| row_matches(i)).collect())
            .collect();
        let mut out = Vec::new();
        for c in chunks.iter_mut() {
            out.append(c);
        }
        out
    } else {
        (0..batch.row_count).filter(|&i| row_matches(i)).collect()
    };

    take(batch, &keep)
}
