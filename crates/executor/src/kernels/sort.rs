//! Sort kernel.
//!
//! Stable sort by one or more keys; ascending by default, `Null` sorts
//! smallest. Descending reverses the comparator, so `Null` lands last
//! there.

use super::{resolve, take};
use basalt_core::ast::OrderByItem;
use basalt_core::error::Result;
use basalt_core::result::ResultSet;
use std::cmp::Ordering;

pub fn sort(batch: &ResultSet, order_by: &[OrderByItem]) -> Result<ResultSet> {
    if order_by.is_empty() || batch.row_count <= 1 {
        return Ok(batch.clone());
    }
    let keys = order_by
        .iter()
        .map(|item| Ok((resolve(batch, &item.column)?, item.ascending)))
        .collect::<Result<Vec<_>>>()?;

    let mut order: Vec<usize> = (0..batch.row_count).collect();
    order.sort_by(|&a, &b| {
        for (col, ascending) in &keys {
            let cmp = col.value(a).total_cmp(&col.value(b));
            let cmp = if *ascending { cmp } else { cmp.reverse() };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
    take(batch, &order)
}
