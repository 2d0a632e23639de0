//! Planner entry point: AST lowering and pipeline orchestration.

use crate::cost::CostModel;
use crate::index::IndexRegistry;
use crate::logical::{LogicalArena, LogicalKind, LogicalNode, NodeId};
use crate::optimizer;
use crate::physical::PhysicalPlan;
use crate::stats::StatisticsCatalog;
use basalt_core::ast::{Projection, SelectStmt};
use basalt_core::error::{Error, Result};
use std::sync::Arc;

/// Schema questions the planner needs answered; implemented by the
/// engine's catalog.
pub trait SchemaProvider: Send + Sync {
    fn table_exists(&self, table: &str) -> bool;
    fn column_exists(&self, table: &str, column: &str) -> bool;
}

/// Planner tuning knobs.
#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// Whether an accelerator runtime is attached
    pub accelerator_present: bool,
    /// Minimum estimated rows before off-load is considered
    pub min_rows_for_offload: u64,
    /// Off-load whenever an accelerator is present, cost be damned
    pub force_accelerator: bool,
    /// Cardinality above which an equality join upgrades to hash join
    pub hash_join_threshold: u64,
    /// Upper bound on per-operator worker fan-out
    pub max_parallelism: usize,
    /// Rows one worker is expected to handle before fan-out pays
    pub rows_per_worker: u64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        PlannerOptions {
            accelerator_present: false,
            min_rows_for_offload: 10_000,
            force_accelerator: false,
            hash_join_threshold: 1_000,
            max_parallelism: 8,
            rows_per_worker: 100_000,
        }
    }
}

/// The query planner.
///
/// Holds handles to the statistics catalog, the index registry, and the
/// cost model; stateless across queries.
pub struct Planner {
    pub catalog: Arc<StatisticsCatalog>,
    pub indexes: Arc<IndexRegistry>,
    pub cost: CostModel,
    pub schema: Arc<dyn SchemaProvider>,
    pub options: PlannerOptions,
}

impl Planner {
    pub fn new(
        catalog: Arc<StatisticsCatalog>,
        indexes: Arc<IndexRegistry>,
        cost: CostModel,
        schema: Arc<dyn SchemaProvider>,
        options: PlannerOptions,
    ) -> Self {
        Planner {
            catalog,
            indexes,
            cost,
            schema,
            options,
        }
    }

    /// Full pipeline: lower, optimize, select physical operators,
    /// annotate.
    pub fn plan(&self, stmt: &SelectStmt) -> Result<PhysicalPlan> {
        self.validate(stmt)?;
        let (mut arena, root) = self.lower(stmt);
        let root = optimizer::predicate_pushdown(&mut arena, root);
        optimizer::join_reorder(&mut arena, root, &self.catalog);
        let mut physical = optimizer::to_physical(&arena, root, self)?;
        optimizer::physical_predicate_pushdown(&mut physical);
        optimizer::annotate_parallelism(&mut physical, &self.options);
        optimizer::annotate_accelerator(&mut physical, &self.cost, &self.options);
        tracing::debug!(plan = %physical.explain(), "planned query");
        Ok(physical)
    }

    /// Re-check index references against the current registry, re-running
    /// physical selection for any subtree whose index vanished between
    /// planning and execution.
    pub fn revalidate(&self, plan: PhysicalPlan) -> Result<PhysicalPlan> {
        optimizer::revalidate_access_methods(plan, self)
    }

    fn validate(&self, stmt: &SelectStmt) -> Result<()> {
        if !self.schema.table_exists(&stmt.from) {
            return Err(Error::UnknownRelation(stmt.from.clone()));
        }
        for join in &stmt.joins {
            if !self.schema.table_exists(&join.table) {
                return Err(Error::UnknownRelation(join.table.clone()));
            }
        }
        let tables: Vec<&str> = std::iter::once(stmt.from.as_str())
            .chain(stmt.joins.iter().map(|j| j.table.as_str()))
            .collect();
        for pred in &stmt.predicates {
            self.check_column(&tables, pred.column.table.as_deref(), &pred.column.column)?;
        }
        for proj in &stmt.projections {
            if let Projection::Column(col) = proj {
                self.check_column(&tables, col.table.as_deref(), &col.column)?;
            }
        }
        Ok(())
    }

    fn check_column(&self, tables: &[&str], qualifier: Option<&str>, column: &str) -> Result<()> {
        match qualifier {
            Some(table) => {
                if !tables.contains(&table) {
                    return Err(Error::UnknownRelation(table.to_string()));
                }
                if !self.schema.column_exists(table, column) {
                    return Err(Error::UnknownColumn {
                        table: table.to_string(),
                        column: column.to_string(),
                    });
                }
            }
            None => {
                if !tables.iter().any(|t| self.schema.column_exists(t, column)) {
                    return Err(Error::UnknownColumn {
                        table: tables.first().unwrap_or(&"?").to_string(),
                        column: column.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Lower a SELECT into the logical arena.
    ///
    /// Clause precedence, bottom up: Scan → Join → Filter →
    /// Aggregate/GroupBy → Window → Sort → Project → Limit. Joins lower
    /// to one n-ary node so reordering can permute all inputs at once;
    /// physical selection rebuilds the left-deep tree.
    fn lower(&self, stmt: &SelectStmt) -> (LogicalArena, NodeId) {
        let mut arena = LogicalArena::new();
        let mut root = arena.push(LogicalNode::scan(&stmt.from));

        if !stmt.joins.is_empty() {
            // One n-ary join node over all inputs; reordering permutes
            // the child list, physical selection folds it left-deep.
            let mut join = LogicalNode::new(LogicalKind::Join);
            join.children.push(root);
            for clause in &stmt.joins {
                let scan = arena.push(LogicalNode::scan(&clause.table));
                join.children.push(scan);
                join.join_conditions
                    .push((clause.left.clone(), clause.right.clone()));
            }
            root = arena.push(join);
        }

        if !stmt.predicates.is_empty() {
            let mut filter = LogicalNode::new(LogicalKind::Filter);
            filter.predicates.extend(stmt.predicates.iter().cloned());
            filter.children.push(root);
            root = arena.push(filter);
        }

        let aggregates: Vec<_> = stmt
            .projections
            .iter()
            .filter_map(|p| match p {
                Projection::Aggregate { func, column } => Some((*func, column.clone())),
                _ => None,
            })
            .collect();
        if !stmt.group_by.is_empty() {
            let mut group = LogicalNode::new(LogicalKind::GroupBy);
            group.columns = stmt.group_by.clone();
            group.aggregates = aggregates.clone();
            group.children.push(root);
            root = arena.push(group);
        } else if !aggregates.is_empty() {
            let mut agg = LogicalNode::new(LogicalKind::Aggregate);
            agg.aggregates = aggregates.clone();
            agg.children.push(root);
            root = arena.push(agg);
        }

        for proj in &stmt.projections {
            if let Projection::Window(expr) = proj {
                let mut window = LogicalNode::new(LogicalKind::Window);
                window.window = Some(expr.clone());
                window.children.push(root);
                root = arena.push(window);
            }
        }

        if !stmt.order_by.is_empty() {
            let mut sort = LogicalNode::new(LogicalKind::Sort);
            sort.order_by = stmt.order_by.clone();
            sort.children.push(root);
            root = arena.push(sort);
        }

        let projected: Vec<_> = stmt
            .projections
            .iter()
            .filter_map(|p| match p {
                Projection::Column(col) => Some(col.clone()),
                _ => None,
            })
            .collect();
        let has_wildcard = stmt
            .projections
            .iter()
            .any(|p| matches!(p, Projection::Wildcard));
        if !projected.is_empty() && !has_wildcard && aggregates.is_empty() {
            let mut project = LogicalNode::new(LogicalKind::Project);
            project.columns = projected;
            project.children.push(root);
            root = arena.push(project);
        }

        if let Some(limit) = stmt.limit {
            let mut node = LogicalNode::new(LogicalKind::Limit);
            node.limit = Some(limit);
            node.children.push(root);
            root = arena.push(node);
        }

        (arena, root)
    }
}
