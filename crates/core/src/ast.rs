//! AST contract with the (external) SQL parser.
//!
//! The tokenizer and parser live outside this workspace; they hand the
//! planner a tree of these shapes. The planner treats this module as a
//! stable contract and infers nothing beyond it.

use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};

/// A reference to a column, optionally qualified by table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Qualifying table name, if the reference was written `t.c`
    pub table: Option<String>,
    /// Column name
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: Option<&str>, column: &str) -> Self {
        ColumnRef {
            table: table.map(str::to_string),
            column: column.to_string(),
        }
    }

    /// Unqualified reference.
    pub fn bare(column: &str) -> Self {
        Self::new(None, column)
    }

    /// Qualified reference `table.column`.
    pub fn qualified(table: &str, column: &str) -> Self {
        Self::new(Some(table), column)
    }
}

/// Comparison operators usable in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Between,
    Like,
}

impl CompareOp {
    /// True for operators an ordered index range scan can serve.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            CompareOp::Lt | CompareOp::LtEq | CompareOp::Gt | CompareOp::GtEq | CompareOp::Between
        )
    }
}

/// A simple predicate: `column op value [AND value2]`.
///
/// `value2` is present only for `Between`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: ColumnRef,
    pub op: CompareOp,
    pub value: Value,
    pub value2: Option<Value>,
}

impl Predicate {
    pub fn new(column: ColumnRef, op: CompareOp, value: Value) -> Self {
        Predicate {
            column,
            op,
            value,
            value2: None,
        }
    }

    pub fn between(column: ColumnRef, low: Value, high: Value) -> Self {
        Predicate {
            column,
            op: CompareOp::Between,
            value: low,
            value2: Some(high),
        }
    }
}

/// Projection item: a column or `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Wildcard,
    Column(ColumnRef),
    /// Aggregate call, e.g. `SUM(amount)`
    Aggregate {
        func: AggregateFunc,
        column: Option<ColumnRef>,
    },
    /// Window function call
    Window(WindowExpr),
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

/// Window functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// Window frame units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameUnits {
    Rows,
    Range,
    Groups,
}

/// One frame bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

/// Window frame specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: FrameBound,
}

impl Default for FrameSpec {
    /// The SQL default frame: RANGE UNBOUNDED PRECEDING .. CURRENT ROW.
    fn default() -> Self {
        FrameSpec {
            units: FrameUnits::Range,
            start: FrameBound::UnboundedPreceding,
            end: FrameBound::CurrentRow,
        }
    }
}

/// A window function expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowExpr {
    pub func: WindowFunc,
    /// Argument column (absent for ROW_NUMBER/RANK/DENSE_RANK/COUNT(*))
    pub arg: Option<ColumnRef>,
    pub partition_by: Vec<ColumnRef>,
    pub order_by: Vec<OrderByItem>,
    pub frame: FrameSpec,
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub column: ColumnRef,
    pub ascending: bool,
}

/// JOIN clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: String,
    /// Equality condition `left = right`
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Column definition in CREATE TABLE / ALTER TABLE ADD COLUMN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub dtype: DataType,
}

/// ALTER TABLE actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn { from: String, to: String },
}

/// Index kinds understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordered index supporting seeks and range scans
    Ordered,
    /// Hash index supporting equality seeks only
    Hash,
}

/// Top-level statements the engine accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Select(SelectStmt),
    Insert {
        table: String,
        /// Column order of the value tuples; empty means schema order
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        predicates: Vec<Predicate>,
    },
    Delete {
        table: String,
        predicates: Vec<Predicate>,
    },
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
    },
    AlterTable {
        name: String,
        action: AlterAction,
    },
    CreateIndex {
        name: String,
        table: String,
        column: String,
        kind: IndexKind,
    },
    DropIndex {
        name: String,
    },
}

/// SELECT statement body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStmt {
    pub projections: Vec<Projection>,
    pub from: String,
    pub joins: Vec<JoinClause>,
    pub predicates: Vec<Predicate>,
    pub group_by: Vec<ColumnRef>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
}

impl SelectStmt {
    /// `SELECT * FROM table` with everything else empty.
    pub fn scan_all(table: &str) -> Self {
        SelectStmt {
            projections: vec![Projection::Wildcard],
            from: table.to_string(),
            joins: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }
}
