//! Join kernels (inner equality joins).
//!
//! Output contract for both algorithms: for each left row in order, emit
//! one row per equal-keyed right row, right rows in their input order.
//! `Null` join keys never match. The output schema is the left columns
//! followed by the right columns.

use super::resolve;
use basalt_core::ast::ColumnRef;
use basalt_core::column::Column;
use basalt_core::error::Result;
use basalt_core::result::ResultSet;
use basalt_core::types::keys::encode_value;
use rustc_hash::FxHashMap;

/// Materialize the joined batch from matched (left, right) row pairs.
fn assemble(
    left: &ResultSet,
    right: &ResultSet,
    pairs: &[(usize, usize)],
) -> Result<ResultSet> {
    let mut columns = Vec::with_capacity(left.columns.len() + right.columns.len());
    for col in &left.columns {
        let mut out = Column::new(col.name.clone(), col.dtype);
        for &(l, _) in pairs {
            out.push(&col.value(l))?;
        }
        columns.push(out);
    }
    for col in &right.columns {
        let mut out = Column::new(col.name.clone(), col.dtype);
        for &(_, r) in pairs {
            out.push(&col.value(r))?;
        }
        columns.push(out);
    }
    ResultSet::from_columns(columns)
}

/// Hash join: build on the right input, probe with the left in order.
pub fn hash_join(
    left: &ResultSet,
    right: &ResultSet,
    left_key: &ColumnRef,
    right_key: &ColumnRef,
) -> Result<ResultSet> {
    let lcol = resolve(left, left_key)?;
    let rcol = resolve(right, right_key)?;

    let mut build: FxHashMap<Vec<u8>, Vec<usize>> = FxHashMap::default();
    for r in 0..right.row_count {
        let v = rcol.value(r);
        if v.is_null() {
            continue;
        }
        build.entry(encode_value(&v)).or_default().push(r);
    }

    let mut pairs = Vec::new();
    for l in 0..left.row_count {
        let v = lcol.value(l);
        if v.is_null() {
            continue;
        }
        if let Some(bucket) = build.get(&encode_value(&v)) {
            for &r in bucket {
                pairs.push((l, r));
            }
        }
    }
    assemble(left, right, &pairs)
}

/// Nested-loop join; `condition: None` degenerates to a cross product.
pub fn nested_loop_join(
    left: &ResultSet,
    right: &ResultSet,
    condition: Option<(&ColumnRef, &ColumnRef)>,
) -> Result<ResultSet> {
    let keys = match condition {
        Some((l, r)) => Some((resolve(left, l)?, resolve(right, r)?)),
        None => None,
    };
    let mut pairs = Vec::new();
    for l in 0..left.row_count {
        for r in 0..right.row_count {
            let keep = match &keys {
                Some((lcol, rcol)) => lcol.value(l).sql_eq(&rcol.value(r)).unwrap_or(false),
                None => true,
            };
            if keep {
                pairs.push((l, r));
            }
        }
    }
    assemble(left, right, &pairs)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use basalt_core::value::Value;

    fn users() -> ResultSet {
        batch(vec![
            int_column("users.id", &[Some(1), Some(2), Some(3)]),
            text_column("users.name", &[Some("alice"), Some("bob"), Some("eve")]),
        ])
    }

    fn orders() -> ResultSet {
        batch(vec![
            int_column("orders.user_id", &[Some(2), Some(1), Some(2), None]),
            int_column("orders.amount", &[Some(10), Some(20), Some(30), Some(40)]),
        ])
    }

    #[test]
    fn test_hash_join_emits_left_order_then_bucket_order() {
        let out = hash_join(
            &users(),
            &orders(),
            &ColumnRef::qualified("users", "id"),
            &ColumnRef::qualified("orders", "user_id"),
        )
        .unwrap();
        // alice matches order@20; bob matches orders 10 and 30 in right
        // input order; eve matches nothing; the null user_id never joins.
        let amounts: Vec<_> = out.column("orders.amount").unwrap().iter().collect();
        assert_eq!(
            amounts,
            vec![Value::Integer(20), Value::Integer(10), Value::Integer(30)]
        );
        assert_eq!(out.columns.len(), 4);
    }

    #[test]
    fn test_nested_loop_matches_hash_join() {
        let hj = hash_join(
            &users(),
            &orders(),
            &ColumnRef::qualified("users", "id"),
            &ColumnRef::qualified("orders", "user_id"),
        )
        .unwrap();
        let nlj = nested_loop_join(
            &users(),
            &orders(),
            Some((
                &ColumnRef::qualified("users", "id"),
                &ColumnRef::qualified("orders", "user_id"),
            )),
        )
        .unwrap();
        assert_eq!(hj, nlj);
    }

    #[test]
    fn test_cross_product_without_condition() {
        let out = nested_loop_join(&users(), &orders(), None).unwrap();
        assert_eq!(out.row_count, 12);
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = batch(vec![int_column("l.k", &[None])]);
        let right = batch(vec![int_column("r.k", &[None])]);
        let out = hash_join(
            &left,
            &right,
            &ColumnRef::qualified("l", "k"),
            &ColumnRef::qualified("r", "k"),
        )
        .unwrap();
        assert_eq!(out.row_count, 0);
    }

    #[test]
    fn test_empty_inputs() {
        let empty_users = batch(vec![int_column("users.id", &[])]);
        let out = hash_join(
            &empty_users,
            &orders(),
            &ColumnRef::qualified("users", "id"),
            &ColumnRef::qualified("orders", "user_id"),
        )
        .unwrap();
        assert_eq!(out.row_count, 0);
    }
}
