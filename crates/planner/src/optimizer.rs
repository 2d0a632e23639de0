//! Optimizer passes.
//!
//! Pass order is fixed and matters:
//!
//! 1. `predicate_pushdown`: qualified filter predicates sink to the
//!    scans of their tables
//! 2. `join_reorder`: n-ary join children sort by estimated
//!    cardinality, smallest left
//! 3. `to_physical`: access-method and join-algorithm selection
//! 4. `physical_predicate_pushdown`: predicates that became pushable
//!    after selection sink again
//! 5. `annotate_parallelism`: worker fan-out per operator
//! 6. `annotate_accelerator`: per-node off-load decision
//!
//! Passes 1–2 rewrite the arena in place; 3 produces the owned physical
//! tree; 4–6 rewrite that tree.

use crate::logical::{LogicalArena, LogicalKind, NodeId};
use crate::physical::{AccessMethod, PhysicalKind, PhysicalPlan};
use crate::planner::{Planner, PlannerOptions};
use crate::stats::StatisticsCatalog;
use crate::cost::CostModel;
use basalt_core::ast::{ColumnRef, CompareOp, Predicate};
use basalt_core::error::{Error, Result};

/// Sink qualified filter predicates onto matching scan descendants.
///
/// A predicate on `T.c` lands on every descendant scan of `T` (self-joins
/// get it on each side). Unqualified predicates stay on the filter. The
/// move is duplicate-free: identical predicates are not reinstalled.
pub fn predicate_pushdown(arena: &mut LogicalArena, root: NodeId) -> NodeId {
    for id in arena.post_order(root) {
        if arena.node(id).kind != LogicalKind::Filter {
            continue;
        }
        let preds: Vec<Predicate> = arena.node(id).predicates.to_vec();
        let mut kept = Vec::new();
        for pred in preds {
            let target_table = match &pred.column.table {
                Some(t) => t.clone(),
                None => {
                    kept.push(pred);
                    continue;
                }
            };
            let scans: Vec<NodeId> = arena
                .scans_under(id)
                .into_iter()
                .filter(|&s| arena.node(s).table.as_deref() == Some(target_table.as_str()))
                .collect();
            if scans.is_empty() {
                kept.push(pred);
                continue;
            }
            for scan in scans {
                arena.node_mut(scan).add_predicate_dedup(pred.clone());
            }
        }
        let node = arena.node_mut(id);
        node.predicates.clear();
        node.predicates.extend(kept);
    }
    root
}

/// Sort every n-ary join's children by estimated cardinality ascending,
/// ties broken by table name. Idempotent: the sort key is stable.
pub fn join_reorder(arena: &mut LogicalArena, root: NodeId, catalog: &StatisticsCatalog) {
    for id in arena.post_order(root) {
        if arena.node(id).kind != LogicalKind::Join || arena.node(id).children.len() < 2 {
            continue;
        }
        let mut keyed: Vec<(u64, String, NodeId)> = arena
            .node(id)
            .children
            .iter()
            .map(|&child| {
                let table = arena.node(child).table.clone().unwrap_or_default();
                (catalog.row_count(&table), table, child)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let node = arena.node_mut(id);
        node.children.clear();
        node.children.extend(keyed.into_iter().map(|(_, _, c)| c));
    }
}

/// Build the scan operator for `table` under `predicates`, choosing the
/// access method:
///
/// - equality predicate with an index on its column → `IndexSeek`
/// - range predicate with an ordered index → `IndexRangeScan`
/// - any other predicate with an index on a referenced column →
///   `IndexScan`
/// - otherwise → `TableScan`
pub(crate) fn select_access(
    planner: &Planner,
    table: &str,
    predicates: Vec<Predicate>,
) -> PhysicalPlan {
    let mut kind = PhysicalKind::TableScan;
    let mut access = AccessMethod::FullScan;

    for pred in &predicates {
        if pred.op == CompareOp::Eq {
            if let Some(idx) = planner.indexes.best_for(table, &pred.column.column, pred.op) {
                kind = PhysicalKind::IndexSeek;
                access = AccessMethod::IndexSeek {
                    index: idx.name,
                    column: idx.column,
                };
                break;
            }
        }
    }
    if kind == PhysicalKind::TableScan {
        for pred in &predicates {
            if pred.op.is_range() {
                if let Some(idx) =
                    planner.indexes.best_for(table, &pred.column.column, pred.op)
                {
                    kind = PhysicalKind::IndexRangeScan;
                    access = AccessMethod::IndexRange {
                        index: idx.name,
                        column: idx.column,
                    };
                    break;
                }
            }
        }
    }
    if kind == PhysicalKind::TableScan {
        for pred in &predicates {
            if let Some(idx) = planner
                .indexes
                .lookup(table, &pred.column.column)
            {
                kind = PhysicalKind::IndexScan;
                access = AccessMethod::IndexLookup {
                    index: idx.name,
                    column: idx.column,
                };
                break;
            }
        }
    }

    let base_rows = planner.catalog.row_count(table);
    let selectivity = planner.catalog.conjunction_selectivity(table, &predicates);
    let mut node = PhysicalPlan::new(kind);
    node.access_method = access;
    node.table = Some(table.to_string());
    node.predicates = predicates;
    node.estimated_rows = ((base_rows as f64 * selectivity).ceil() as u64).max(1);
    node
}

/// Lower the optimized logical arena to a physical tree.
pub fn to_physical(arena: &LogicalArena, root: NodeId, planner: &Planner) -> Result<PhysicalPlan> {
    convert(arena, root, planner)
}

fn convert(arena: &LogicalArena, id: NodeId, planner: &Planner) -> Result<PhysicalPlan> {
    let logical = arena.node(id);
    match logical.kind {
        LogicalKind::Scan => {
            let table = logical
                .table
                .as_deref()
                .ok_or_else(|| Error::UnknownRelation("<unnamed scan>".to_string()))?;
            Ok(select_access(planner, table, logical.predicates.to_vec()))
        }
        LogicalKind::Filter => {
            let child = convert(arena, logical.children[0], planner)?;
            if logical.predicates.is_empty() {
                return Ok(child);
            }
            let selectivity = filter_selectivity(planner, &child, &logical.predicates);
            let mut node = PhysicalPlan::new(PhysicalKind::Filter);
            node.estimated_rows =
                ((child.estimated_rows as f64 * selectivity).ceil() as u64).max(1);
            node.predicates = logical.predicates.to_vec();
            node.children.push(child);
            Ok(node)
        }
        LogicalKind::Join => {
            let mut acc = convert(arena, logical.children[0], planner)?;
            for &child_id in logical.children.iter().skip(1) {
                let child = convert(arena, child_id, planner)?;
                let condition = find_condition(&logical.join_conditions, &acc, &child);
                let threshold = planner.options.hash_join_threshold;
                let use_hash = condition.is_some()
                    && (acc.estimated_rows > threshold || child.estimated_rows > threshold);
                let mut join = PhysicalPlan::new(if use_hash {
                    PhysicalKind::HashJoin
                } else {
                    PhysicalKind::NestedLoopJoin
                });
                join.estimated_rows = acc.estimated_rows.max(child.estimated_rows);
                join.join_on = condition;
                join.children.push(acc);
                join.children.push(child);
                acc = join;
            }
            Ok(acc)
        }
        LogicalKind::Aggregate => {
            let child = convert(arena, logical.children[0], planner)?;
            let mut node = PhysicalPlan::new(PhysicalKind::Aggregate);
            node.aggregates = logical.aggregates.clone();
            node.estimated_rows = 1;
            node.children.push(child);
            Ok(node)
        }
        LogicalKind::GroupBy => {
            let child = convert(arena, logical.children[0], planner)?;
            let mut node = PhysicalPlan::new(PhysicalKind::GroupBy);
            node.group_keys = logical.columns.clone();
            node.aggregates = logical.aggregates.clone();
            node.estimated_rows = group_estimate(planner, &child, &logical.columns);
            node.children.push(child);
            Ok(node)
        }
        LogicalKind::Sort => {
            let child = convert(arena, logical.children[0], planner)?;
            let mut node = PhysicalPlan::new(PhysicalKind::Sort);
            node.order_by = logical.order_by.clone();
            node.estimated_rows = child.estimated_rows;
            node.children.push(child);
            Ok(node)
        }
        LogicalKind::Project => {
            let child = convert(arena, logical.children[0], planner)?;
            let mut node = PhysicalPlan::new(PhysicalKind::Project);
            node.columns = logical.columns.clone();
            node.estimated_rows = child.estimated_rows;
            node.children.push(child);
            Ok(node)
        }
        LogicalKind::Limit => {
            let child = convert(arena, logical.children[0], planner)?;
            let mut node = PhysicalPlan::new(PhysicalKind::Limit);
            node.limit = logical.limit;
            node.estimated_rows = logical
                .limit
                .unwrap_or(child.estimated_rows)
                .min(child.estimated_rows);
            node.children.push(child);
            Ok(node)
        }
        LogicalKind::Window => {
            let child = convert(arena, logical.children[0], planner)?;
            let mut node = PhysicalPlan::new(PhysicalKind::Window);
            node.window = logical.window.clone();
            node.estimated_rows = child.estimated_rows;
            node.children.push(child);
            Ok(node)
        }
    }
}

/// Orient a join condition so the left column refers to the accumulated
/// (left) input and the right column to the incoming child.
fn find_condition(
    conditions: &[(ColumnRef, ColumnRef)],
    left: &PhysicalPlan,
    right: &PhysicalPlan,
) -> Option<(ColumnRef, ColumnRef)> {
    let mut left_tables = Vec::new();
    left.visit(&mut |n| {
        if let Some(t) = &n.table {
            left_tables.push(t.clone());
        }
    });
    let right_table = right.table.clone()?;
    for (l, r) in conditions {
        let l_table = l.table.as_deref().unwrap_or("");
        let r_table = r.table.as_deref().unwrap_or("");
        if r_table == right_table && left_tables.iter().any(|t| t == l_table) {
            return Some((l.clone(), r.clone()));
        }
        if l_table == right_table && left_tables.iter().any(|t| t == r_table) {
            return Some((r.clone(), l.clone()));
        }
    }
    None
}

fn filter_selectivity(planner: &Planner, child: &PhysicalPlan, preds: &[Predicate]) -> f64 {
    match &child.table {
        Some(table) => planner.catalog.conjunction_selectivity(table, preds),
        None => 0.25f64.powi(preds.len() as i32),
    }
}

fn group_estimate(planner: &Planner, child: &PhysicalPlan, keys: &[ColumnRef]) -> u64 {
    if let (Some(table), Some(key)) = (&child.table, keys.first()) {
        if let Some(stats) = planner.catalog.column_stats(table, &key.column) {
            if stats.ndv > 0 {
                return stats.ndv.min(child.estimated_rows.max(1));
            }
        }
    }
    ((child.estimated_rows as f64).sqrt().ceil() as u64).max(1)
}

/// Sink filter predicates that became pushable after physical selection
/// (e.g. a residual join filter over one side). Filters left empty
/// dissolve into their child.
pub fn physical_predicate_pushdown(plan: &mut PhysicalPlan) {
    for child in &mut plan.children {
        physical_predicate_pushdown(child);
    }
    if plan.kind != PhysicalKind::Filter {
        return;
    }
    let preds = std::mem::take(&mut plan.predicates);
    let mut kept = Vec::new();
    for pred in preds {
        let target = match &pred.column.table {
            Some(t) => t.clone(),
            None => {
                kept.push(pred);
                continue;
            }
        };
        let mut moved = false;
        for child in &mut plan.children {
            moved |= try_sink(child, &target, &pred);
        }
        if !moved {
            kept.push(pred);
        }
    }
    plan.predicates = kept;
    if plan.predicates.is_empty() && plan.children.len() == 1 {
        *plan = plan.children.remove(0);
    }
}

fn is_scan_kind(kind: PhysicalKind) -> bool {
    matches!(
        kind,
        PhysicalKind::TableScan
            | PhysicalKind::IndexSeek
            | PhysicalKind::IndexRangeScan
            | PhysicalKind::IndexScan
    )
}

fn try_sink(node: &mut PhysicalPlan, table: &str, pred: &Predicate) -> bool {
    if is_scan_kind(node.kind) && node.table.as_deref() == Some(table) {
        if !node.predicates.iter().any(|p| p == pred) {
            node.predicates.push(pred.clone());
        }
        return true;
    }
    let mut moved = false;
    for child in &mut node.children {
        moved |= try_sink(child, table, pred);
    }
    moved
}

/// Assign worker fan-out proportional to estimated rows, clamped to the
/// configured maximum. Non-offloadable operators stay single-threaded.
pub fn annotate_parallelism(plan: &mut PhysicalPlan, options: &PlannerOptions) {
    if plan.kind.offloadable() {
        let degree = (plan.estimated_rows / options.rows_per_worker.max(1)) as usize;
        plan.parallel_degree = degree.clamp(1, options.max_parallelism.max(1));
    } else {
        plan.parallel_degree = 1;
    }
    for child in &mut plan.children {
        annotate_parallelism(child, options);
    }
}

/// Decide off-load per node:
///
/// - an accelerator must be present
/// - estimated rows must reach `min_rows_for_offload`
/// - the accelerator cost must beat 0.8x the CPU cost
///
/// `force_accelerator` overrides the last two gates but never the first.
/// Each node decides independently; a leaf on the accelerator may feed a
/// CPU parent.
pub fn annotate_accelerator(plan: &mut PhysicalPlan, cost: &CostModel, options: &PlannerOptions) {
    plan.use_accelerator = options.accelerator_present
        && plan.kind.offloadable()
        && (options.force_accelerator
            || (plan.estimated_rows >= options.min_rows_for_offload
                && cost.accelerator_cost(plan) < 0.8 * cost.cpu_operator_cost(plan)));
    for child in &mut plan.children {
        annotate_accelerator(child, cost, options);
    }
}

/// Re-run access selection for scans whose index disappeared after
/// planning. Everything else passes through untouched.
pub fn revalidate_access_methods(mut plan: PhysicalPlan, planner: &Planner) -> Result<PhysicalPlan> {
    let children = std::mem::take(&mut plan.children);
    plan.children = children
        .into_iter()
        .map(|c| revalidate_access_methods(c, planner))
        .collect::<Result<Vec<_>>>()?;

    if is_scan_kind(plan.kind) {
        if let Some(index) = plan.access_method.index_name() {
            if !planner.indexes.exists(index) {
                let table = plan.table.clone().unwrap_or_default();
                tracing::debug!(table, index, "index dropped after planning; reselecting");
                let mut fresh = select_access(planner, &table, plan.predicates.clone());
                fresh.parallel_degree = plan.parallel_degree;
                annotate_accelerator(&mut fresh, &planner.cost, &planner.options);
                return Ok(fresh);
            }
        }
    }
    Ok(plan)
}
