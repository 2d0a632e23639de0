//! Query planning and optimization.
//!
//! The planner turns an AST into an executable physical plan in four
//! stages:
//!
//! ```text
//! AST ──plan──▶ LogicalPlan ──optimize──▶ LogicalPlan
//!     ──select──▶ PhysicalPlan ──annotate──▶ PhysicalPlan
//! ```
//!
//! Logical plans live in an arena with index-based child links so the
//! rewrite passes (predicate pushdown, join reordering) mutate in place
//! without fighting ownership. Physical plans are owned trees handed to
//! the executor.
//!
//! Rewrites apply in a fixed order: predicate pushdown, join reordering,
//! physical selection, physical predicate pushdown, parallelism
//! annotation, accelerator annotation.

pub mod cost;
pub mod index;
pub mod logical;
pub mod optimizer;
pub mod physical;
pub mod planner;
pub mod stats;

pub use cost::{CostModel, CostWeights};
pub use index::{IndexDef, IndexRegistry};
pub use logical::{LogicalArena, LogicalKind, LogicalNode, NodeId};
pub use physical::{AccessMethod, PhysicalKind, PhysicalPlan};
pub use planner::{Planner, PlannerOptions, SchemaProvider};
pub use stats::{ColumnStats, StatisticsCatalog, TableStats, DEFAULT_ROW_ESTIMATE};
