//! Plan executor.
//!
//! Walks a `PhysicalPlan` bottom-up, producing a columnar `ResultSet` per
//! node. Scans pull rows from the `TableProvider` (which reads through
//! the caller's transaction snapshot); inner nodes run kernels. Nodes the
//! planner flagged with `use_accelerator` stage their input buffers in
//! the device cache first and fall back to the CPU path when staging
//! fails.

use crate::accel::{AcceleratorRuntime, DeviceBufferCache};
use crate::kernels::{aggregate, filter, join, sort, window};
use crate::provider::{RangeBound, TableProvider};
use basalt_core::ast::{ColumnRef, CompareOp, Predicate};
use basalt_core::error::{Error, Result};
use basalt_core::result::ResultSet;
use basalt_planner::{AccessMethod, PhysicalKind, PhysicalPlan};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Executes physical plans against a row provider.
pub struct Executor {
    provider: Arc<dyn TableProvider>,
    accelerator: Option<(Arc<dyn AcceleratorRuntime>, Arc<DeviceBufferCache>)>,
}

impl Executor {
    pub fn new(provider: Arc<dyn TableProvider>) -> Self {
        Executor {
            provider,
            accelerator: None,
        }
    }

    /// Attach an accelerator runtime; the device cache is sized to its
    /// memory budget.
    pub fn with_accelerator(self, runtime: Arc<dyn AcceleratorRuntime>) -> Self {
        let cache = Arc::new(DeviceBufferCache::new(runtime.memory_budget()));
        self.with_accelerator_shared(runtime, cache)
    }

    /// Attach an accelerator with a cache shared across executors, so
    /// staged table buffers survive between queries.
    pub fn with_accelerator_shared(
        mut self,
        runtime: Arc<dyn AcceleratorRuntime>,
        cache: Arc<DeviceBufferCache>,
    ) -> Self {
        self.accelerator = Some((runtime, cache));
        self
    }

    /// Whether an accelerator is attached.
    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    /// Device cache, for eviction passes and introspection.
    pub fn device_cache(&self) -> Option<&DeviceBufferCache> {
        self.accelerator.as_ref().map(|(_, c)| c.as_ref())
    }

    /// Execute the plan to a columnar result.
    pub fn execute(&self, plan: &PhysicalPlan) -> Result<ResultSet> {
        match plan.kind {
            PhysicalKind::TableScan | PhysicalKind::IndexScan => self.run_scan(plan, None),
            PhysicalKind::IndexSeek => {
                // The driving predicate is the equality on the index
                // column the planner chose.
                let column = plan.access_method.index_column();
                let pred = plan
                    .predicates
                    .iter()
                    .find(|p| {
                        p.op == CompareOp::Eq && Some(p.column.column.as_str()) == column
                    })
                    .cloned();
                self.run_scan(plan, pred)
            }
            PhysicalKind::IndexRangeScan => {
                let column = plan.access_method.index_column();
                let pred = plan
                    .predicates
                    .iter()
                    .find(|p| p.op.is_range() && Some(p.column.column.as_str()) == column)
                    .cloned();
                self.run_scan(plan, pred)
            }
            PhysicalKind::Filter => {
                let input = self.execute(&plan.children[0])?;
                self.run_filter(plan, &input, &plan.predicates)
            }
            PhysicalKind::Project => {
                let input = self.execute(&plan.children[0])?;
                project(&input, &plan.columns)
            }
            PhysicalKind::NestedLoopJoin | PhysicalKind::HashJoin => self.run_join(plan),
            PhysicalKind::Aggregate => {
                let input = self.execute(&plan.children[0])?;
                self.with_staging(plan, &input, |batch| {
                    aggregate::aggregate(batch, &plan.aggregates)
                })
            }
            PhysicalKind::GroupBy => {
                let input = self.execute(&plan.children[0])?;
                self.with_staging(plan, &input, |batch| {
                    aggregate::group_by(batch, &plan.group_keys, &plan.aggregates)
                })
            }
            PhysicalKind::Sort => {
                let input = self.execute(&plan.children[0])?;
                self.with_staging(plan, &input, |batch| sort::sort(batch, &plan.order_by))
            }
            PhysicalKind::Limit => {
                let input = self.execute(&plan.children[0])?;
                let n = plan.limit.unwrap_or(input.row_count as u64) as usize;
                let keep: Vec<usize> = (0..input.row_count.min(n)).collect();
                crate::kernels::take(&input, &keep)
            }
            PhysicalKind::Window => {
                let input = self.execute(&plan.children[0])?;
                let expr = plan.window.as_ref().ok_or_else(|| {
                    Error::SyntaxError("window node without window expression".to_string())
                })?;
                self.with_staging(plan, &input, |batch| window::window(batch, expr))
            }
        }
    }

    fn run_scan(&self, plan: &PhysicalPlan, consumed: Option<Predicate>) -> Result<ResultSet> {
        let table = plan
            .table
            .as_deref()
            .ok_or_else(|| Error::UnknownRelation("<unnamed scan>".to_string()))?;
        let schema = self.provider.schema(table)?;
        let rows = match (&plan.kind, &consumed) {
            (PhysicalKind::IndexSeek, Some(pred)) => {
                self.provider
                    .index_seek(table, &pred.column.column, &pred.value)?
            }
            (PhysicalKind::IndexRangeScan, Some(pred)) => {
                let (low, high) = range_bounds(pred);
                self.provider
                    .index_range(table, &pred.column.column, low, high)?
            }
            _ => self.provider.scan(table)?,
        };
        let batch = ResultSet::from_rows(&schema, &rows)?;
        let residual: Vec<Predicate> = plan
            .predicates
            .iter()
            .filter(|p| consumed.as_ref() != Some(*p))
            .cloned()
            .collect();
        self.run_filter(plan, &batch, &residual)
    }

    fn run_filter(
        &self,
        plan: &PhysicalPlan,
        input: &ResultSet,
        preds: &[Predicate],
    ) -> Result<ResultSet> {
        if preds.is_empty() {
            return Ok(input.clone());
        }
        self.with_staging(plan, input, |batch| {
            filter::filter(batch, preds, plan.parallel_degree)
        })
    }

    fn run_join(&self, plan: &PhysicalPlan) -> Result<ResultSet> {
        let left = qualify(self.execute(&plan.children[0])?, &plan.children[0]);
        let right = qualify(self.execute(&plan.children[1])?, &plan.children[1]);
        let joined = match (&plan.kind, &plan.join_on) {
            (PhysicalKind::HashJoin, Some((l, r))) => self.with_staging_pair(
                plan,
                &left,
                &right,
                |l_batch, r_batch| join::hash_join(l_batch, r_batch, l, r),
            )?,
            (PhysicalKind::HashJoin, None) => {
                return Err(Error::SyntaxError(
                    "hash join requires an equality condition".to_string(),
                ))
            }
            (_, cond) => {
                let cond = cond.as_ref().map(|(l, r)| (l, r));
                join::nested_loop_join(&left, &right, cond)?
            }
        };
        // Residual join predicates (non-equi leftovers) filter the output.
        self.run_filter(plan, &joined, &plan.predicates)
    }

    /// Run `kernel` with the batch's buffers staged on the device when
    /// this node is flagged for off-load; fall back to the CPU path when
    /// staging fails.
    fn with_staging<F>(&self, plan: &PhysicalPlan, input: &ResultSet, kernel: F) -> Result<ResultSet>
    where
        F: Fn(&ResultSet) -> Result<ResultSet>,
    {
        if !plan.use_accelerator {
            return kernel(input);
        }
        let Some((runtime, cache)) = &self.accelerator else {
            return kernel(input);
        };
        match stage_batch(cache, plan, input) {
            Ok(ids) => {
                let result = kernel(input);
                for id in ids {
                    cache.unpin(id);
                }
                result
            }
            Err(Error::OutOfAcceleratorMemory { requested }) => {
                tracing::warn!(
                    device = runtime.name(),
                    requested,
                    "accelerator staging failed; falling back to CPU"
                );
                kernel(input)
            }
            Err(e) => Err(e),
        }
    }

    fn with_staging_pair<F>(
        &self,
        plan: &PhysicalPlan,
        left: &ResultSet,
        right: &ResultSet,
        kernel: F,
    ) -> Result<ResultSet>
    where
        F: Fn(&ResultSet, &ResultSet) -> Result<ResultSet>,
    {
        self.with_staging(plan, left, |l| {
            self.with_staging(plan, right, |r| kernel(l, r))
        })
    }
}

/// Inclusive/exclusive bounds for an index range scan.
fn range_bounds(pred: &Predicate) -> (RangeBound, RangeBound) {
    match pred.op {
        CompareOp::Gt => (RangeBound::Exclusive(pred.value.clone()), RangeBound::Unbounded),
        CompareOp::GtEq => (RangeBound::Inclusive(pred.value.clone()), RangeBound::Unbounded),
        CompareOp::Lt => (RangeBound::Unbounded, RangeBound::Exclusive(pred.value.clone())),
        CompareOp::LtEq => (RangeBound::Unbounded, RangeBound::Inclusive(pred.value.clone())),
        CompareOp::Between => (
            RangeBound::Inclusive(pred.value.clone()),
            pred.value2
                .clone()
                .map(RangeBound::Inclusive)
                .unwrap_or(RangeBound::Unbounded),
        ),
        _ => (RangeBound::Unbounded, RangeBound::Unbounded),
    }
}

/// Prefix bare column names with the node's table so join outputs stay
/// unambiguous.
fn qualify(mut batch: ResultSet, node: &PhysicalPlan) -> ResultSet {
    if let Some(table) = &node.table {
        for col in &mut batch.columns {
            if !col.name.contains('.') {
                col.name = format!("{table}.{}", col.name);
            }
        }
    }
    batch
}

/// Select and rename the projected columns.
fn project(input: &ResultSet, columns: &[ColumnRef]) -> Result<ResultSet> {
    let mut out = Vec::with_capacity(columns.len());
    for col_ref in columns {
        let col = crate::kernels::resolve(input, col_ref)?;
        let mut projected = col.clone();
        projected.name = col_ref.column.clone();
        out.push(projected);
    }
    ResultSet::from_columns(out)
}

/// Logical identity of a column buffer for the device cache.
fn buffer_id(plan: &PhysicalPlan, col_name: &str, len: usize, rows: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    plan.table.hash(&mut hasher);
    col_name.hash(&mut hasher);
    len.hash(&mut hasher);
    rows.hash(&mut hasher);
    hasher.finish()
}

fn stage_batch(
    cache: &DeviceBufferCache,
    plan: &PhysicalPlan,
    batch: &ResultSet,
) -> Result<Vec<u64>> {
    let mut pinned = Vec::with_capacity(batch.columns.len());
    for col in &batch.columns {
        let id = buffer_id(plan, &col.name, col.data.len(), col.row_count);
        match cache.pin(id, || col.data.clone()) {
            Ok(_) => pinned.push(id),
            Err(e) => {
                for id in pinned {
                    cache.unpin(id);
                }
                return Err(e);
            }
        }
    }
    Ok(pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::HostVectorRuntime;
    use basalt_core::value::{DataType, Value};
    use parking_lot::Mutex;

    /// Canned provider over a single in-memory table.
    struct FixtureProvider {
        schema: Vec<(String, DataType)>,
        rows: Vec<Vec<Value>>,
        seeks: Mutex<usize>,
    }

    impl FixtureProvider {
        fn users() -> Self {
            FixtureProvider {
                schema: vec![
                    ("id".to_string(), DataType::Int64),
                    ("name".to_string(), DataType::Utf8),
                ],
                rows: vec![
                    vec![Value::Integer(1), Value::text("alice")],
                    vec![Value::Integer(2), Value::text("bob")],
                    vec![Value::Integer(3), Value::text("eve")],
                ],
                seeks: Mutex::new(0),
            }
        }
    }

    impl TableProvider for FixtureProvider {
        fn schema(&self, _table: &str) -> Result<Vec<(String, DataType)>> {
            Ok(self.schema.clone())
        }
        fn scan(&self, _table: &str) -> Result<Vec<Vec<Value>>> {
            Ok(self.rows.clone())
        }
        fn index_seek(
            &self,
            _table: &str,
            column: &str,
            value: &Value,
        ) -> Result<Vec<Vec<Value>>> {
            *self.seeks.lock() += 1;
            let idx = self
                .schema
                .iter()
                .position(|(n, _)| n == column)
                .expect("seek column");
            Ok(self
                .rows
                .iter()
                .filter(|r| r[idx].sql_eq(value).unwrap_or(false))
                .cloned()
                .collect())
        }
        fn index_range(
            &self,
            _table: &str,
            _column: &str,
            _low: RangeBound,
            _high: RangeBound,
        ) -> Result<Vec<Vec<Value>>> {
            Ok(self.rows.clone())
        }
    }

    fn scan_plan() -> PhysicalPlan {
        let mut p = PhysicalPlan::new(PhysicalKind::TableScan);
        p.table = Some("users".to_string());
        p.estimated_rows = 3;
        p
    }

    #[test]
    fn test_table_scan_returns_rows_in_order() {
        let exec = Executor::new(Arc::new(FixtureProvider::users()));
        let out = exec.execute(&scan_plan()).unwrap();
        assert_eq!(out.row_count, 3);
        assert_eq!(out.columns[0].value(0), Value::Integer(1));
        assert_eq!(out.columns[1].value(2), Value::text("eve"));
    }

    #[test]
    fn test_index_seek_uses_provider_seek() {
        let provider = Arc::new(FixtureProvider::users());
        let exec = Executor::new(Arc::clone(&provider) as Arc<dyn TableProvider>);
        let mut plan = PhysicalPlan::new(PhysicalKind::IndexSeek);
        plan.table = Some("users".to_string());
        plan.access_method = AccessMethod::IndexSeek {
            index: "users_id".to_string(),
            column: "id".to_string(),
        };
        plan.predicates.push(Predicate::new(
            ColumnRef::qualified("users", "id"),
            CompareOp::Eq,
            Value::Integer(2),
        ));
        let out = exec.execute(&plan).unwrap();
        assert_eq!(out.row_count, 1);
        assert_eq!(out.columns[1].value(0), Value::text("bob"));
        assert_eq!(*provider.seeks.lock(), 1);
    }

    #[test]
    fn test_scan_applies_residual_predicates() {
        let exec = Executor::new(Arc::new(FixtureProvider::users()));
        let mut plan = scan_plan();
        plan.predicates.push(Predicate::new(
            ColumnRef::qualified("users", "id"),
            CompareOp::GtEq,
            Value::Integer(2),
        ));
        let out = exec.execute(&plan).unwrap();
        assert_eq!(out.row_count, 2);
    }

    #[test]
    fn test_limit_truncates() {
        let exec = Executor::new(Arc::new(FixtureProvider::users()));
        let mut limit = PhysicalPlan::new(PhysicalKind::Limit);
        limit.limit = Some(2);
        limit.children.push(scan_plan());
        let out = exec.execute(&limit).unwrap();
        assert_eq!(out.row_count, 2);
    }

    #[test]
    fn test_project_selects_and_renames() {
        let exec = Executor::new(Arc::new(FixtureProvider::users()));
        let mut proj = PhysicalPlan::new(PhysicalKind::Project);
        proj.columns.push(ColumnRef::bare("name"));
        proj.children.push(scan_plan());
        let out = exec.execute(&proj).unwrap();
        assert_eq!(out.column_names(), vec!["name"]);
    }

    #[test]
    fn test_accelerated_node_matches_cpu_result() {
        let provider = Arc::new(FixtureProvider::users());
        let cpu_exec = Executor::new(Arc::clone(&provider) as Arc<dyn TableProvider>);
        let accel_exec = Executor::new(provider)
            .with_accelerator(Arc::new(HostVectorRuntime::default()));

        let mut plan = PhysicalPlan::new(PhysicalKind::Sort);
        plan.order_by.push(basalt_core::ast::OrderByItem {
            column: ColumnRef::bare("name"),
            ascending: false,
        });
        plan.children.push(scan_plan());

        let cpu = cpu_exec.execute(&plan).unwrap();
        plan.use_accelerator = true;
        let accel = accel_exec.execute(&plan).unwrap();
        assert_eq!(cpu, accel);
        assert!(accel_exec.device_cache().unwrap().used_bytes() > 0);
    }

    #[test]
    fn test_tiny_device_budget_falls_back_to_cpu() {
        let provider = Arc::new(FixtureProvider::users());
        let exec = Executor::new(provider)
            .with_accelerator(Arc::new(HostVectorRuntime::new(1)));
        let mut plan = scan_plan();
        plan.use_accelerator = true;
        plan.predicates.push(Predicate::new(
            ColumnRef::qualified("users", "id"),
            CompareOp::Gt,
            Value::Integer(1),
        ));
        // Staging cannot fit a single buffer, but the query still runs.
        let out = exec.execute(&plan).unwrap();
        assert_eq!(out.row_count, 2);
    }
}
