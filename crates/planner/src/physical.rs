//! Physical plans.
//!
//! The optimizer's final product: an owned operator tree with access
//! methods resolved, accelerator and parallelism annotations applied, and
//! cardinality estimates attached for the executor's buffer sizing.

use basalt_core::ast::{
    AggregateFunc, ColumnRef, OrderByItem, Predicate, WindowExpr,
};
use std::fmt::Write as _;

/// Physical operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalKind {
    TableScan,
    IndexSeek,
    IndexRangeScan,
    IndexScan,
    Filter,
    Project,
    NestedLoopJoin,
    HashJoin,
    Aggregate,
    GroupBy,
    Sort,
    Limit,
    Window,
}

impl PhysicalKind {
    /// Kinds eligible for accelerator off-load.
    pub fn offloadable(&self) -> bool {
        matches!(
            self,
            PhysicalKind::TableScan
                | PhysicalKind::Filter
                | PhysicalKind::NestedLoopJoin
                | PhysicalKind::HashJoin
                | PhysicalKind::Aggregate
                | PhysicalKind::Sort
                | PhysicalKind::GroupBy
                | PhysicalKind::Window
        )
    }
}

/// How a table is read. Index methods carry the driving column so the
/// executor can pick the matching predicate out of the node's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMethod {
    /// Walk every row
    FullScan,
    /// Point lookup through the named index
    IndexSeek { index: String, column: String },
    /// Ordered range through the named index
    IndexRange { index: String, column: String },
    /// Index-driven scan for non-sargable predicates
    IndexLookup { index: String, column: String },
}

impl AccessMethod {
    /// Name of the index this method depends on, if any.
    pub fn index_name(&self) -> Option<&str> {
        match self {
            AccessMethod::FullScan => None,
            AccessMethod::IndexSeek { index, .. }
            | AccessMethod::IndexRange { index, .. }
            | AccessMethod::IndexLookup { index, .. } => Some(index),
        }
    }

    /// Column the index method drives on, if any.
    pub fn index_column(&self) -> Option<&str> {
        match self {
            AccessMethod::FullScan => None,
            AccessMethod::IndexSeek { column, .. }
            | AccessMethod::IndexRange { column, .. }
            | AccessMethod::IndexLookup { column, .. } => Some(column),
        }
    }
}

/// One node of the executable plan.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub kind: PhysicalKind,
    pub access_method: AccessMethod,
    pub table: Option<String>,
    pub predicates: Vec<Predicate>,
    /// Projected columns; empty means "all"
    pub columns: Vec<ColumnRef>,
    pub children: Vec<PhysicalPlan>,
    pub use_accelerator: bool,
    /// Worker fan-out for this operator; always >= 1
    pub parallel_degree: usize,
    pub join_on: Option<(ColumnRef, ColumnRef)>,
    pub aggregates: Vec<(AggregateFunc, Option<ColumnRef>)>,
    pub group_keys: Vec<ColumnRef>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub window: Option<WindowExpr>,
    /// Optimizer cardinality estimate, for executor sizing and EXPLAIN
    pub estimated_rows: u64,
}

impl PhysicalPlan {
    pub fn new(kind: PhysicalKind) -> Self {
        PhysicalPlan {
            kind,
            access_method: AccessMethod::FullScan,
            table: None,
            predicates: Vec::new(),
            columns: Vec::new(),
            children: Vec::new(),
            use_accelerator: false,
            parallel_degree: 1,
            join_on: None,
            aggregates: Vec::new(),
            group_keys: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            window: None,
            estimated_rows: 0,
        }
    }

    /// Depth-first walk over the tree.
    pub fn visit(&self, f: &mut impl FnMut(&PhysicalPlan)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Render an indented tree for EXPLAIN output.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = write!(out, "{:?}", self.kind);
        if let Some(table) = &self.table {
            let _ = write!(out, " {table}");
        }
        if let Some(index) = self.access_method.index_name() {
            let _ = write!(out, " via {index}");
        }
        if !self.predicates.is_empty() {
            let _ = write!(out, " preds={}", self.predicates.len());
        }
        let _ = write!(out, " rows~{}", self.estimated_rows);
        if self.parallel_degree > 1 {
            let _ = write!(out, " par={}", self.parallel_degree);
        }
        if self.use_accelerator {
            out.push_str(" accel");
        }
        out.push('\n');
        for child in &self.children {
            child.explain_into(out, depth + 1);
        }
    }
}
