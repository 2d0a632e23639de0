//! Window kernel.
//!
//! Preserves the input row count: the output is the input batch plus one
//! computed column. Rows are partitioned by the partition keys; within a
//! partition they are ordered by the order keys; the function is computed
//! over the frame (`ROWS`, `RANGE`, or `GROUPS`, with
//! unbounded/current/±offset bounds).
//!
//! Ranking functions ignore the frame: `ROW_NUMBER` is the position in
//! partition order, `RANK` the position of the first peer, `DENSE_RANK`
//! the peer-group ordinal. `RANGE` offset bounds require a single
//! integer `ORDER BY` key; unbounded/current bounds work for any key and
//! operate on peer groups.

use super::aggregate::{eval as eval_agg, output_type};
use super::resolve;
use basalt_core::ast::{
    AggregateFunc, FrameBound, FrameSpec, FrameUnits, WindowExpr, WindowFunc,
};
use basalt_core::column::Column;
use basalt_core::error::{Error, Result};
use basalt_core::result::ResultSet;
use basalt_core::value::{DataType, Value};
use std::cmp::Ordering;

pub fn window(batch: &ResultSet, expr: &WindowExpr) -> Result<ResultSet> {
    let n = batch.row_count;
    let partition_cols = expr
        .partition_by
        .iter()
        .map(|c| resolve(batch, c))
        .collect::<Result<Vec<_>>>()?;
    let order_cols = expr
        .order_by
        .iter()
        .map(|item| Ok((resolve(batch, &item.column)?, item.ascending)))
        .collect::<Result<Vec<_>>>()?;
    let arg_col = expr.arg.as_ref().map(|c| resolve(batch, c)).transpose()?;

    // Partition-major, order-minor stable sort of row indices.
    let mut sorted: Vec<usize> = (0..n).collect();
    sorted.sort_by(|&a, &b| {
        for col in &partition_cols {
            let cmp = col.value(a).total_cmp(&col.value(b));
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        for (col, ascending) in &order_cols {
            let cmp = col.value(a).total_cmp(&col.value(b));
            let cmp = if *ascending { cmp } else { cmp.reverse() };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });

    let same_partition = |a: usize, b: usize| {
        partition_cols
            .iter()
            .all(|c| c.value(a).total_cmp(&c.value(b)) == Ordering::Equal)
    };

    let mut out = vec![Value::Null; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && same_partition(sorted[start], sorted[end]) {
            end += 1;
        }
        let ctx = PartitionCtx::build(&sorted[start..end], &order_cols);
        ctx.compute(expr, arg_col, &mut out)?;
        start = end;
    }

    let dtype = window_output_type(expr, arg_col.map(|c| c.dtype));
    let mut col = Column::new(window_output_name(expr), dtype);
    for v in &out {
        col.push(v)?;
    }
    let mut columns = batch.columns.clone();
    columns.push(col);
    ResultSet::from_columns(columns)
}

/// One partition's rows in window order, with peer-group structure.
struct PartitionCtx<'a> {
    part: &'a [usize],
    /// Peer-group id per position
    group_of: Vec<usize>,
    /// Inclusive (first, last) position per peer group
    group_bounds: Vec<(usize, usize)>,
    /// First order key, for RANGE offset frames
    order_col: Option<&'a Column>,
    order_asc: bool,
    order_key_count: usize,
}

impl<'a> PartitionCtx<'a> {
    fn build(part: &'a [usize], order_cols: &[(&'a Column, bool)]) -> Self {
        let plen = part.len();
        let same_peers = |a: usize, b: usize| {
            order_cols
                .iter()
                .all(|(c, _)| c.value(a).total_cmp(&c.value(b)) == Ordering::Equal)
        };
        let mut group_of = vec![0usize; plen];
        let mut group_bounds = Vec::new();
        let mut g = 0;
        let mut gstart = 0;
        for pos in 1..plen {
            if !same_peers(part[pos - 1], part[pos]) {
                group_bounds.push((gstart, pos - 1));
                g += 1;
                gstart = pos;
            }
            group_of[pos] = g;
        }
        if plen > 0 {
            group_bounds.push((gstart, plen - 1));
        }
        PartitionCtx {
            part,
            group_of,
            group_bounds,
            order_col: order_cols.first().map(|(c, _)| *c),
            order_asc: order_cols.first().map(|(_, asc)| *asc).unwrap_or(true),
            order_key_count: order_cols.len(),
        }
    }

    fn compute(
        &self,
        expr: &WindowExpr,
        arg_col: Option<&Column>,
        out: &mut [Value],
    ) -> Result<()> {
        for pos in 0..self.part.len() {
            let row = self.part[pos];
            out[row] = match expr.func {
                WindowFunc::RowNumber => Value::Integer(pos as i64 + 1),
                WindowFunc::Rank => {
                    Value::Integer(self.group_bounds[self.group_of[pos]].0 as i64 + 1)
                }
                WindowFunc::DenseRank => Value::Integer(self.group_of[pos] as i64 + 1),
                WindowFunc::Sum
                | WindowFunc::Avg
                | WindowFunc::Min
                | WindowFunc::Max
                | WindowFunc::Count => match self.frame_positions(&expr.frame, pos)? {
                    Some((lo, hi)) if lo <= hi => {
                        let rows: Vec<usize> = self.part[lo..=hi].to_vec();
                        eval_agg(agg_func(expr.func), arg_col, &rows)?
                    }
                    _ => empty_frame_value(expr.func),
                },
            };
        }
        Ok(())
    }

    /// Inclusive `[lo, hi]` positions of the frame for the row at `pos`;
    /// `None` means the frame is empty.
    fn frame_positions(&self, frame: &FrameSpec, pos: usize) -> Result<Option<(usize, usize)>> {
        let plen = self.part.len();
        let gmax = self.group_bounds.len() - 1;
        let g = self.group_of[pos];

        let rows_bound = |bound: FrameBound| -> usize {
            match bound {
                FrameBound::UnboundedPreceding => 0,
                FrameBound::Preceding(k) => pos.saturating_sub(k as usize),
                FrameBound::CurrentRow => pos,
                FrameBound::Following(k) => (pos + k as usize).min(plen - 1),
                FrameBound::UnboundedFollowing => plen - 1,
            }
        };
        let group_lo = |bound: FrameBound| -> usize {
            let target = match bound {
                FrameBound::UnboundedPreceding => 0,
                FrameBound::Preceding(k) => g.saturating_sub(k as usize),
                FrameBound::CurrentRow => g,
                FrameBound::Following(k) => (g + k as usize).min(gmax),
                FrameBound::UnboundedFollowing => gmax,
            };
            self.group_bounds[target].0
        };
        let group_hi = |bound: FrameBound| -> usize {
            let target = match bound {
                FrameBound::UnboundedPreceding => 0,
                FrameBound::Preceding(k) => g.saturating_sub(k as usize),
                FrameBound::CurrentRow => g,
                FrameBound::Following(k) => (g + k as usize).min(gmax),
                FrameBound::UnboundedFollowing => gmax,
            };
            self.group_bounds[target].1
        };

        match frame.units {
            FrameUnits::Rows => Ok(Some((rows_bound(frame.start), rows_bound(frame.end)))),
            FrameUnits::Groups => Ok(Some((group_lo(frame.start), group_hi(frame.end)))),
            FrameUnits::Range => {
                let lo = match frame.start {
                    FrameBound::UnboundedPreceding => Some(0),
                    FrameBound::CurrentRow => Some(self.group_bounds[g].0),
                    FrameBound::UnboundedFollowing => Some(self.group_bounds[gmax].0),
                    FrameBound::Preceding(k) => self.range_first(pos, -(k as i64))?,
                    FrameBound::Following(k) => self.range_first(pos, k as i64)?,
                };
                let hi = match frame.end {
                    FrameBound::UnboundedPreceding => Some(self.group_bounds[0].1),
                    FrameBound::CurrentRow => Some(self.group_bounds[g].1),
                    FrameBound::UnboundedFollowing => Some(plen - 1),
                    FrameBound::Preceding(k) => self.range_last(pos, -(k as i64))?,
                    FrameBound::Following(k) => self.range_last(pos, k as i64)?,
                };
                Ok(lo.zip(hi))
            }
        }
    }

    fn order_key_int(&self, pos: usize) -> Result<i64> {
        let col = self.order_col.ok_or_else(|| {
            Error::TypeMismatch("RANGE offset frame requires an ORDER BY key".to_string())
        })?;
        if self.order_key_count != 1 {
            return Err(Error::TypeMismatch(
                "RANGE offset frame requires exactly one ORDER BY key".to_string(),
            ));
        }
        match col.value(self.part[pos]) {
            Value::Integer(i) => Ok(i),
            other => Err(Error::TypeMismatch(format!(
                "RANGE offset frame requires an integer ORDER BY key, got {other:?}"
            ))),
        }
    }

    /// First position whose key is on or past `current + delta` in frame
    /// direction.
    fn range_first(&self, pos: usize, delta: i64) -> Result<Option<usize>> {
        let target = self.order_key_int(pos)? + if self.order_asc { delta } else { -delta };
        for p in 0..self.part.len() {
            let key = self.order_key_int(p)?;
            let inside = if self.order_asc { key >= target } else { key <= target };
            if inside {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }

    /// Last position whose key is on or before `current + delta`.
    fn range_last(&self, pos: usize, delta: i64) -> Result<Option<usize>> {
        let target = self.order_key_int(pos)? + if self.order_asc { delta } else { -delta };
        let mut last = None;
        for p in 0..self.part.len() {
            let key = self.order_key_int(p)?;
            let inside = if self.order_asc { key <= target } else { key >= target };
            if inside {
                last = Some(p);
            }
        }
        Ok(last)
    }
}

fn agg_func(f: WindowFunc) -> AggregateFunc {
    match f {
        WindowFunc::Sum => AggregateFunc::Sum,
        WindowFunc::Avg => AggregateFunc::Avg,
        WindowFunc::Min => AggregateFunc::Min,
        WindowFunc::Max => AggregateFunc::Max,
        WindowFunc::Count => AggregateFunc::Count,
        _ => unreachable!("ranking functions have no frame aggregate"),
    }
}

fn empty_frame_value(f: WindowFunc) -> Value {
    match f {
        WindowFunc::Count => Value::Integer(0),
        _ => Value::Null,
    }
}

fn window_output_type(expr: &WindowExpr, arg: Option<DataType>) -> DataType {
    match expr.func {
        WindowFunc::RowNumber | WindowFunc::Rank | WindowFunc::DenseRank | WindowFunc::Count => {
            DataType::Int64
        }
        WindowFunc::Avg => DataType::Float64,
        WindowFunc::Sum => output_type(AggregateFunc::Sum, arg),
        WindowFunc::Min | WindowFunc::Max => arg.unwrap_or(DataType::Int64),
    }
}

fn window_output_name(expr: &WindowExpr) -> String {
    let base = match expr.func {
        WindowFunc::RowNumber => "row_number",
        WindowFunc::Rank => "rank",
        WindowFunc::DenseRank => "dense_rank",
        WindowFunc::Sum => "sum",
        WindowFunc::Avg => "avg",
        WindowFunc::Min => "min",
        WindowFunc::Max => "max",
        WindowFunc::Count => "count",
    };
    match &expr.arg {
        Some(col) => format!("{base}({})", col.column),
        None => format!("{base}()"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use basalt_core::ast::{ColumnRef, OrderByItem};

    fn expr(func: WindowFunc, arg: Option<&str>) -> WindowExpr {
        WindowExpr {
            func,
            arg: arg.map(ColumnRef::bare),
            partition_by: vec![ColumnRef::bare("dept")],
            order_by: vec![OrderByItem {
                column: ColumnRef::bare("salary"),
                ascending: true,
            }],
            frame: FrameSpec::default(),
        }
    }

    fn staff() -> ResultSet {
        batch(vec![
            int_column("dept", &[Some(1), Some(1), Some(1), Some(2), Some(2)]),
            int_column("salary", &[Some(100), Some(200), Some(200), Some(50), Some(70)]),
        ])
    }

    fn output_for(b: &ResultSet, e: &WindowExpr) -> Vec<Value> {
        let out = window(b, e).unwrap();
        assert_eq!(out.row_count, b.row_count);
        out.columns.last().unwrap().iter().collect()
    }

    #[test]
    fn test_row_number_per_partition() {
        let vals = output_for(&staff(), &expr(WindowFunc::RowNumber, None));
        assert_eq!(
            vals,
            vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
                Value::Integer(1),
                Value::Integer(2)
            ]
        );
    }

    #[test]
    fn test_rank_and_dense_rank_with_ties() {
        let ranks = output_for(&staff(), &expr(WindowFunc::Rank, None));
        assert_eq!(
            ranks[..3],
            [Value::Integer(1), Value::Integer(2), Value::Integer(2)]
        );
        let dense = output_for(&staff(), &expr(WindowFunc::DenseRank, None));
        assert_eq!(
            dense[..3],
            [Value::Integer(1), Value::Integer(2), Value::Integer(2)]
        );
    }

    #[test]
    fn test_default_frame_is_running_total_over_peers() {
        // RANGE UNBOUNDED PRECEDING..CURRENT ROW includes the whole peer
        // group, so both 200-salary rows see the full 500.
        let sums = output_for(&staff(), &expr(WindowFunc::Sum, Some("salary")));
        assert_eq!(
            sums,
            vec![
                Value::Integer(100),
                Value::Integer(500),
                Value::Integer(500),
                Value::Integer(50),
                Value::Integer(120)
            ]
        );
    }

    #[test]
    fn test_rows_frame_running_total_splits_peers() {
        let mut e = expr(WindowFunc::Sum, Some("salary"));
        e.frame = FrameSpec {
            units: FrameUnits::Rows,
            start: FrameBound::UnboundedPreceding,
            end: FrameBound::CurrentRow,
        };
        let sums = output_for(&staff(), &e);
        assert_eq!(
            sums[..3],
            [Value::Integer(100), Value::Integer(300), Value::Integer(500)]
        );
    }

    #[test]
    fn test_rows_sliding_frame() {
        let mut e = expr(WindowFunc::Sum, Some("salary"));
        e.frame = FrameSpec {
            units: FrameUnits::Rows,
            start: FrameBound::Preceding(1),
            end: FrameBound::CurrentRow,
        };
        let sums = output_for(&staff(), &e);
        assert_eq!(
            sums,
            vec![
                Value::Integer(100),
                Value::Integer(300),
                Value::Integer(400),
                Value::Integer(50),
                Value::Integer(120)
            ]
        );
    }

    #[test]
    fn test_range_offset_frame() {
        // Salaries within 100 below the current row.
        let mut e = expr(WindowFunc::Count, Some("salary"));
        e.frame = FrameSpec {
            units: FrameUnits::Range,
            start: FrameBound::Preceding(100),
            end: FrameBound::CurrentRow,
        };
        let counts = output_for(&staff(), &e);
        // dept 1: 100 -> {100}; 200 -> {100,200,200} twice.
        assert_eq!(
            counts[..3],
            [Value::Integer(1), Value::Integer(3), Value::Integer(3)]
        );
    }

    #[test]
    fn test_groups_frame() {
        let mut e = expr(WindowFunc::Count, None);
        e.frame = FrameSpec {
            units: FrameUnits::Groups,
            start: FrameBound::CurrentRow,
            end: FrameBound::UnboundedFollowing,
        };
        let counts = output_for(&staff(), &e);
        // dept 1 groups: {100}, {200,200}. From group of 100: 3 rows.
        assert_eq!(counts[0], Value::Integer(3));
        assert_eq!(counts[1], Value::Integer(2));
    }

    #[test]
    fn test_whole_partition_frame() {
        let mut e = expr(WindowFunc::Max, Some("salary"));
        e.frame = FrameSpec {
            units: FrameUnits::Rows,
            start: FrameBound::UnboundedPreceding,
            end: FrameBound::UnboundedFollowing,
        };
        let maxes = output_for(&staff(), &e);
        assert_eq!(maxes[0], Value::Integer(200));
        assert_eq!(maxes[3], Value::Integer(70));
    }

    #[test]
    fn test_range_offset_requires_integer_key() {
        let b = batch(vec![
            int_column("dept", &[Some(1)]),
            text_column("salary", &[Some("x")]),
        ]);
        let mut e = expr(WindowFunc::Sum, Some("salary"));
        e.frame = FrameSpec {
            units: FrameUnits::Range,
            start: FrameBound::Preceding(1),
            end: FrameBound::CurrentRow,
        };
        assert!(window(&b, &e).is_err());
    }
}
