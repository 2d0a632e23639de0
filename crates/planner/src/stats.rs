//! Statistics catalog.
//!
//! Per-table row counts and per-column distributions feed cardinality
//! estimation. Stats are refreshed by the engine (full-scan recompute);
//! between refreshes they drift, which only degrades plan quality, never
//! correctness.

use basalt_core::ast::{CompareOp, Predicate};
use basalt_core::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Row estimate used when a table has no statistics.
pub const DEFAULT_ROW_ESTIMATE: u64 = 1_000;

/// Fallback selectivity for predicates we cannot estimate from stats.
const DEFAULT_EQ_SELECTIVITY: f64 = 0.1;
const DEFAULT_RANGE_SELECTIVITY: f64 = 0.3;
const DEFAULT_LIKE_SELECTIVITY: f64 = 0.25;

/// Per-column distribution summary.
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    /// Distinct value count
    pub ndv: u64,
    /// Null count
    pub null_count: u64,
    /// Smallest non-null value
    pub min: Option<Value>,
    /// Largest non-null value
    pub max: Option<Value>,
}

/// Per-table statistics.
#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub row_count: u64,
    pub columns: FxHashMap<String, ColumnStats>,
}

/// Catalog of statistics, keyed by table name.
#[derive(Default)]
pub struct StatisticsCatalog {
    tables: RwLock<FxHashMap<String, TableStats>>,
}

impl StatisticsCatalog {
    pub fn new() -> Self {
        StatisticsCatalog::default()
    }

    /// Replace the stats for one table (ANALYZE-style refresh).
    pub fn put_table(&self, table: &str, stats: TableStats) {
        self.tables.write().insert(table.to_string(), stats);
    }

    /// Remove stats when a table is dropped.
    pub fn remove_table(&self, table: &str) {
        self.tables.write().remove(table);
    }

    /// Row count, or the default estimate when the table is unknown.
    pub fn row_count(&self, table: &str) -> u64 {
        self.tables
            .read()
            .get(table)
            .map(|t| t.row_count)
            .unwrap_or(DEFAULT_ROW_ESTIMATE)
    }

    /// Whether the catalog has real stats for `table`.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    pub fn column_stats(&self, table: &str, column: &str) -> Option<ColumnStats> {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.columns.get(column))
            .cloned()
    }

    /// Estimated fraction of rows satisfying `pred` against `table`.
    ///
    /// Equality uses `1/ndv`; ranges interpolate against `[min, max]` for
    /// integers; everything else falls back to fixed fractions.
    pub fn selectivity(&self, table: &str, pred: &Predicate) -> f64 {
        let col = match self.column_stats(table, &pred.column.column) {
            Some(c) => c,
            None => return default_selectivity(pred.op),
        };
        match pred.op {
            CompareOp::Eq => {
                if col.ndv > 0 {
                    (1.0 / col.ndv as f64).min(1.0)
                } else {
                    DEFAULT_EQ_SELECTIVITY
                }
            }
            CompareOp::NotEq => {
                if col.ndv > 0 {
                    1.0 - (1.0 / col.ndv as f64).min(1.0)
                } else {
                    1.0 - DEFAULT_EQ_SELECTIVITY
                }
            }
            CompareOp::Lt | CompareOp::LtEq => {
                range_fraction(&col, None, Some(&pred.value))
            }
            CompareOp::Gt | CompareOp::GtEq => {
                range_fraction(&col, Some(&pred.value), None)
            }
            CompareOp::Between => {
                range_fraction(&col, Some(&pred.value), pred.value2.as_ref())
            }
            CompareOp::Like => DEFAULT_LIKE_SELECTIVITY,
        }
    }

    /// Combined selectivity of a conjunction, assuming independence.
    pub fn conjunction_selectivity(&self, table: &str, preds: &[Predicate]) -> f64 {
        preds
            .iter()
            .map(|p| self.selectivity(table, p))
            .product::<f64>()
            .clamp(0.0, 1.0)
    }
}

fn default_selectivity(op: CompareOp) -> f64 {
    match op {
        CompareOp::Eq => DEFAULT_EQ_SELECTIVITY,
        CompareOp::NotEq => 1.0 - DEFAULT_EQ_SELECTIVITY,
        CompareOp::Like => DEFAULT_LIKE_SELECTIVITY,
        _ => DEFAULT_RANGE_SELECTIVITY,
    }
}

/// Fraction of `[min, max]` covered by `[low, high]`, by linear
/// interpolation over integer bounds. Non-integer columns fall back to
/// the default range selectivity.
fn range_fraction(col: &ColumnStats, low: Option<&Value>, high: Option<&Value>) -> f64 {
    let (min, max) = match (&col.min, &col.max) {
        (Some(Value::Integer(min)), Some(Value::Integer(max))) if max > min => (*min, *max),
        _ => return DEFAULT_RANGE_SELECTIVITY,
    };
    let width = (max - min) as f64;
    let lo = match low {
        Some(Value::Integer(v)) => (*v).clamp(min, max),
        Some(_) => return DEFAULT_RANGE_SELECTIVITY,
        None => min,
    };
    let hi = match high {
        Some(Value::Integer(v)) => (*v).clamp(min, max),
        Some(_) => return DEFAULT_RANGE_SELECTIVITY,
        None => max,
    };
    if hi < lo {
        return 0.0;
    }
    (((hi - lo) as f64) / width).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::ast::ColumnRef;

    fn catalog_with_ages() -> StatisticsCatalog {
        let catalog = StatisticsCatalog::new();
        let mut stats = TableStats {
            row_count: 10_000,
            columns: FxHashMap::default(),
        };
        stats.columns.insert(
            "age".to_string(),
            ColumnStats {
                ndv: 100,
                null_count: 0,
                min: Some(Value::Integer(0)),
                max: Some(Value::Integer(100)),
            },
        );
        catalog.put_table("users", stats);
        catalog
    }

    #[test]
    fn test_unknown_table_uses_default_estimate() {
        let catalog = StatisticsCatalog::new();
        assert_eq!(catalog.row_count("missing"), DEFAULT_ROW_ESTIMATE);
        assert!(!catalog.has_table("missing"));
    }

    #[test]
    fn test_equality_selectivity_is_one_over_ndv() {
        let catalog = catalog_with_ages();
        let pred = Predicate::new(ColumnRef::bare("age"), CompareOp::Eq, Value::Integer(30));
        let sel = catalog.selectivity("users", &pred);
        assert!((sel - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_range_selectivity_interpolates() {
        let catalog = catalog_with_ages();
        let pred = Predicate::between(
            ColumnRef::bare("age"),
            Value::Integer(25),
            Value::Integer(75),
        );
        let sel = catalog.selectivity("users", &pred);
        assert!((sel - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_range_is_zero() {
        let catalog = catalog_with_ages();
        let pred = Predicate::between(
            ColumnRef::bare("age"),
            Value::Integer(80),
            Value::Integer(20),
        );
        assert_eq!(catalog.selectivity("users", &pred), 0.0);
    }

    #[test]
    fn test_conjunction_multiplies() {
        let catalog = catalog_with_ages();
        let preds = vec![
            Predicate::new(ColumnRef::bare("age"), CompareOp::Eq, Value::Integer(1)),
            Predicate::new(ColumnRef::bare("age"), CompareOp::Eq, Value::Integer(2)),
        ];
        let sel = catalog.conjunction_selectivity("users", &preds);
        assert!((sel - 0.0001).abs() < 1e-9);
    }

    #[test]
    fn test_drop_table_forgets_stats() {
        let catalog = catalog_with_ages();
        catalog.remove_table("users");
        assert_eq!(catalog.row_count("users"), DEFAULT_ROW_ESTIMATE);
    }
}
