//! Logical plan arena.
//!
//! Plan nodes live in a flat `Vec` and refer to children by index. The
//! optimizer's rewrite passes (predicate pushdown, join reordering)
//! mutate nodes in place and reorder child lists without cloning
//! subtrees or juggling ownership.

use basalt_core::ast::{
    AggregateFunc, ColumnRef, OrderByItem, Predicate, WindowExpr,
};
use smallvec::SmallVec;

/// Index of a node within its arena.
pub type NodeId = usize;

/// Logical operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalKind {
    Scan,
    Filter,
    Project,
    Join,
    Aggregate,
    GroupBy,
    Sort,
    Limit,
    Window,
}

/// One logical plan node.
///
/// Fields are optional by kind: a `Scan` has a table, a `Filter` has
/// predicates, a `Join` has a condition, and so on. Keeping one struct
/// (rather than an enum) lets pushdown move predicates between kinds
/// without restructuring.
#[derive(Debug, Clone)]
pub struct LogicalNode {
    pub kind: LogicalKind,
    pub table: Option<String>,
    /// Projected columns (Project) or group keys (GroupBy)
    pub columns: Vec<ColumnRef>,
    pub predicates: SmallVec<[Predicate; 2]>,
    pub children: SmallVec<[NodeId; 2]>,
    /// Equality join conditions `left = right`, one per joined input
    pub join_conditions: Vec<(ColumnRef, ColumnRef)>,
    pub aggregates: Vec<(AggregateFunc, Option<ColumnRef>)>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub window: Option<WindowExpr>,
}

impl LogicalNode {
    pub fn new(kind: LogicalKind) -> Self {
        LogicalNode {
            kind,
            table: None,
            columns: Vec::new(),
            predicates: SmallVec::new(),
            children: SmallVec::new(),
            join_conditions: Vec::new(),
            aggregates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            window: None,
        }
    }

    pub fn scan(table: &str) -> Self {
        let mut n = LogicalNode::new(LogicalKind::Scan);
        n.table = Some(table.to_string());
        n
    }

    pub fn with_child(mut self, child: NodeId) -> Self {
        self.children.push(child);
        self
    }

    /// Append `pred` unless an identical predicate is already present.
    pub fn add_predicate_dedup(&mut self, pred: Predicate) {
        if !self.predicates.iter().any(|p| p == &pred) {
            self.predicates.push(pred);
        }
    }
}

/// Flat arena of logical nodes plus the root index.
#[derive(Debug, Clone, Default)]
pub struct LogicalArena {
    nodes: Vec<LogicalNode>,
}

impl LogicalArena {
    pub fn new() -> Self {
        LogicalArena::default()
    }

    pub fn push(&mut self, node: LogicalNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> &LogicalNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut LogicalNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of every node in the subtree under `root`, post-order.
    pub fn post_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_post_order(root, &mut out);
        out
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in self.nodes[id].children.clone().iter() {
            self.collect_post_order(child, out);
        }
        out.push(id);
    }

    /// All scan descendants of `id` (including `id` itself if a scan).
    pub fn scans_under(&self, id: NodeId) -> Vec<NodeId> {
        self.post_order(id)
            .into_iter()
            .filter(|&n| self.nodes[n].kind == LogicalKind::Scan)
            .collect()
    }
}
