//! Cost model.
//!
//! Maps an operator (with its cardinality estimate) to a scalar cost.
//! Costs are comparative, not predictive: the only consumers are join
//! ordering, hash-join selection, and the CPU/accelerator decision.
//!
//! Formulas:
//! - scan, filter, aggregate, group-by, window: linear in input rows
//! - sort: `n log2 n`
//! - nested-loop join: `|L| * |R|`
//! - hash join: `|L| + |R|` plus a build-side materialization term
//! - accelerator: operator cost at the accelerator throughput discount,
//!   plus a fixed launch overhead, plus transfer proportional to
//!   `rows * row_size * 2` (in and out)
//!
//! All arithmetic saturates at `f64::MAX`; an overflowed cost is not an
//! error, it just loses every comparison against the CPU path.

use crate::physical::{PhysicalKind, PhysicalPlan};

/// Tunable weights. Each is the per-unit cost of the thing it names,
/// in arbitrary cost units.
#[derive(Debug, Clone)]
pub struct CostWeights {
    /// Cost of touching one row on the CPU
    pub cpu_row: f64,
    /// Cost of one row comparison during sort
    pub cpu_compare: f64,
    /// Cost of hashing one row into a build table
    pub hash_build_row: f64,
    /// Fixed cost of launching one accelerator kernel
    pub accel_launch: f64,
    /// Cost per byte moved to or from the accelerator
    pub accel_transfer_byte: f64,
    /// Accelerator throughput discount applied to row work (< 1.0)
    pub accel_row_discount: f64,
    /// Assumed bytes per row for transfer estimation
    pub row_size: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            cpu_row: 1.0,
            cpu_compare: 0.5,
            hash_build_row: 1.5,
            accel_launch: 5_000.0,
            accel_transfer_byte: 0.002,
            accel_row_discount: 0.05,
            row_size: 64.0,
        }
    }
}

/// Cost model over the physical plan shapes.
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    pub weights: CostWeights,
}

impl CostModel {
    pub fn new(weights: CostWeights) -> Self {
        CostModel { weights }
    }

    /// Intrinsic CPU cost of `node` given its inputs, children excluded.
    pub fn cpu_operator_cost(&self, node: &PhysicalPlan) -> f64 {
        let w = &self.weights;
        let rows = node.estimated_rows as f64;
        match node.kind {
            PhysicalKind::TableScan
            | PhysicalKind::IndexScan
            | PhysicalKind::Filter
            | PhysicalKind::Project
            | PhysicalKind::Aggregate
            | PhysicalKind::GroupBy
            | PhysicalKind::Window
            | PhysicalKind::Limit => saturating_mul(rows, w.cpu_row),
            PhysicalKind::IndexSeek => w.cpu_row,
            PhysicalKind::IndexRangeScan => saturating_mul(rows, w.cpu_row * 0.5),
            PhysicalKind::Sort => {
                let n = rows.max(1.0);
                saturating_mul(saturating_mul(n, n.log2().max(1.0)), w.cpu_compare)
            }
            PhysicalKind::NestedLoopJoin => {
                let (l, r) = child_rows(node);
                saturating_mul(saturating_mul(l, r), w.cpu_row)
            }
            PhysicalKind::HashJoin => {
                let (l, r) = child_rows(node);
                let probe = saturating_mul(saturating_add(l, r), w.cpu_row);
                // Build side is the smaller input.
                let build = saturating_mul(l.min(r), w.hash_build_row);
                saturating_add(probe, build)
            }
        }
    }

    /// Full CPU cost: operator plus children, recursively.
    pub fn cpu_cost(&self, node: &PhysicalPlan) -> f64 {
        let mut cost = self.cpu_operator_cost(node);
        for child in &node.children {
            cost = saturating_add(cost, self.cpu_cost(child));
        }
        cost
    }

    /// Cost of running `node`'s operator on the accelerator: discounted
    /// row work plus launch overhead plus round-trip transfer.
    pub fn accelerator_cost(&self, node: &PhysicalPlan) -> f64 {
        let w = &self.weights;
        let compute = saturating_mul(self.cpu_operator_cost(node), w.accel_row_discount);
        let transfer = saturating_mul(
            saturating_mul(node.estimated_rows as f64, w.row_size),
            w.accel_transfer_byte * 2.0,
        );
        saturating_add(saturating_add(compute, w.accel_launch), transfer)
    }
}

fn child_rows(node: &PhysicalPlan) -> (f64, f64) {
    let l = node
        .children
        .first()
        .map(|c| c.estimated_rows as f64)
        .unwrap_or(0.0);
    let r = node
        .children
        .get(1)
        .map(|c| c.estimated_rows as f64)
        .unwrap_or(0.0);
    (l, r)
}

fn saturating_mul(a: f64, b: f64) -> f64 {
    let v = a * b;
    if v.is_finite() {
        v
    } else {
        f64::MAX
    }
}

fn saturating_add(a: f64, b: f64) -> f64 {
    let v = a + b;
    if v.is_finite() {
        v
    } else {
        f64::MAX
    }
}
