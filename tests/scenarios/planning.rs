//! Planner behavior scenarios.

use crate::open_db;
use basalt_planner::TableStats;
use basaltdb::ast::{
    ColumnDef, ColumnRef, CompareOp, IndexKind, JoinClause, Predicate, SelectStmt, Statement,
};
use basaltdb::{Database, DataType, EngineConfig, Value};
use tempfile::TempDir;

fn create_orders_and_users(db: &Database) {
    for (table, key_col) in [("orders", "user_id"), ("users", "id")] {
        db.execute(&Statement::CreateTable {
            name: table.into(),
            columns: vec![
                ColumnDef {
                    name: key_col.into(),
                    dtype: DataType::Int64,
                },
                ColumnDef {
                    name: "amount".into(),
                    dtype: DataType::Int64,
                },
            ],
        })
        .unwrap();
    }
}

fn seed_stats(db: &Database, table: &str, rows: u64) {
    db.stats().put_table(
        table,
        TableStats {
            row_count: rows,
            ..TableStats::default()
        },
    );
}

#[test]
fn test_join_reordering_puts_smaller_table_left() {
    let dir = TempDir::new().unwrap();
    // Keep the join as a nested loop so operand order is visible.
    let mut config = EngineConfig::at(dir.path());
    config.hash_join_threshold = u64::MAX;
    let db = Database::open(config).unwrap();
    create_orders_and_users(&db);
    seed_stats(&db, "orders", 10_000);
    seed_stats(&db, "users", 1_000);

    let mut stmt = SelectStmt::scan_all("orders");
    stmt.joins.push(JoinClause {
        table: "users".into(),
        left: ColumnRef::qualified("orders", "user_id"),
        right: ColumnRef::qualified("users", "id"),
    });
    let plan = db.explain(&stmt).unwrap();

    let join_line = plan
        .lines()
        .position(|l| l.contains("NestedLoopJoin"))
        .expect("nested loop join in plan");
    let users_line = plan.lines().position(|l| l.contains("users")).unwrap();
    let orders_line = plan.lines().position(|l| l.contains("orders")).unwrap();
    assert!(join_line < users_line, "join is the root");
    assert!(
        users_line < orders_line,
        "users (1k rows) goes left of orders (10k):\n{plan}"
    );
}

#[test]
fn test_equality_join_above_threshold_uses_hash_join() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_orders_and_users(&db);
    seed_stats(&db, "orders", 10_000);
    seed_stats(&db, "users", 1_000);

    let mut stmt = SelectStmt::scan_all("orders");
    stmt.joins.push(JoinClause {
        table: "users".into(),
        left: ColumnRef::qualified("orders", "user_id"),
        right: ColumnRef::qualified("users", "id"),
    });
    let plan = db.explain(&stmt).unwrap();
    assert!(plan.contains("HashJoin"), "{plan}");
}

#[test]
fn test_index_changes_access_method() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_orders_and_users(&db);

    let mut stmt = SelectStmt::scan_all("users");
    stmt.predicates.push(Predicate::new(
        ColumnRef::qualified("users", "id"),
        CompareOp::Eq,
        Value::Integer(5),
    ));
    assert!(db.explain(&stmt).unwrap().contains("TableScan"));

    db.execute(&Statement::CreateIndex {
        name: "users_id".into(),
        table: "users".into(),
        column: "id".into(),
        kind: IndexKind::Ordered,
    })
    .unwrap();
    let plan = db.explain(&stmt).unwrap();
    assert!(plan.contains("IndexSeek"), "{plan}");
    assert!(plan.contains("users_id"), "{plan}");

    // Range predicates pick the range scan through the same index.
    let mut range = SelectStmt::scan_all("users");
    range.predicates.push(Predicate::new(
        ColumnRef::qualified("users", "id"),
        CompareOp::GtEq,
        Value::Integer(5),
    ));
    assert!(db.explain(&range).unwrap().contains("IndexRangeScan"));
}

#[test]
fn test_index_seek_matches_table_scan_results() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_orders_and_users(&db);
    for id in 0..50i64 {
        db.execute(&Statement::Insert {
            table: "users".into(),
            columns: vec![],
            rows: vec![vec![Value::Integer(id % 10), Value::Integer(id)]],
        })
        .unwrap();
    }

    let mut stmt = SelectStmt::scan_all("users");
    stmt.predicates.push(Predicate::new(
        ColumnRef::qualified("users", "id"),
        CompareOp::Eq,
        Value::Integer(3),
    ));
    let before = db.execute(&Statement::Select(stmt.clone())).unwrap();

    db.execute(&Statement::CreateIndex {
        name: "users_id".into(),
        table: "users".into(),
        column: "id".into(),
        kind: IndexKind::Ordered,
    })
    .unwrap();
    let after = db.execute(&Statement::Select(stmt)).unwrap();

    // Pushdown and access-method changes preserve semantics.
    let mut rows_before = before.to_rows();
    let mut rows_after = after.to_rows();
    rows_before.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    rows_after.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(rows_before, rows_after);
    assert_eq!(rows_before.len(), 5);
}

#[test]
fn test_dropped_index_replans_before_execution() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_orders_and_users(&db);
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![vec![Value::Integer(1), Value::Integer(10)]],
    })
    .unwrap();
    db.execute(&Statement::CreateIndex {
        name: "users_id".into(),
        table: "users".into(),
        column: "id".into(),
        kind: IndexKind::Ordered,
    })
    .unwrap();
    db.execute(&Statement::DropIndex {
        name: "users_id".into(),
    })
    .unwrap();

    // Execution re-selects the access method; the query still answers.
    let mut stmt = SelectStmt::scan_all("users");
    stmt.predicates.push(Predicate::new(
        ColumnRef::qualified("users", "id"),
        CompareOp::Eq,
        Value::Integer(1),
    ));
    let rows = db.execute(&Statement::Select(stmt)).unwrap();
    assert_eq!(rows.row_count, 1);
}

#[test]
fn test_forced_accelerator_annotates_plan() {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::at(dir.path());
    config.accelerator_enabled = true;
    config.force_accelerator = true;
    let db = Database::open(config).unwrap();
    create_orders_and_users(&db);

    let plan = db.explain(&SelectStmt::scan_all("orders")).unwrap();
    assert!(plan.contains("accel"), "{plan}");

    // The accelerated plan still executes (host-backed runtime).
    db.execute(&Statement::Insert {
        table: "orders".into(),
        columns: vec![],
        rows: vec![vec![Value::Integer(1), Value::Integer(2)]],
    })
    .unwrap();
    let rows = db
        .execute(&Statement::Select(SelectStmt::scan_all("orders")))
        .unwrap();
    assert_eq!(rows.row_count, 1);
}

#[test]
fn test_group_by_and_order_by_pipeline() {
    use basaltdb::ast::{AggregateFunc, OrderByItem, Projection};
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_orders_and_users(&db);
    for (user, amount) in [(1i64, 10i64), (2, 5), (1, 7), (2, 20)] {
        db.execute(&Statement::Insert {
            table: "orders".into(),
            columns: vec![],
            rows: vec![vec![Value::Integer(user), Value::Integer(amount)]],
        })
        .unwrap();
    }

    let stmt = SelectStmt {
        projections: vec![Projection::Aggregate {
            func: AggregateFunc::Sum,
            column: Some(ColumnRef::bare("amount")),
        }],
        from: "orders".into(),
        joins: vec![],
        predicates: vec![],
        group_by: vec![ColumnRef::bare("user_id")],
        order_by: vec![],
        limit: None,
    };
    let result = db.execute(&Statement::Select(stmt)).unwrap();
    assert_eq!(result.row_count, 2);
    let rows = result.to_rows();
    assert!(rows.contains(&vec![Value::Integer(1), Value::Integer(17)]));
    assert!(rows.contains(&vec![Value::Integer(2), Value::Integer(25)]));

    // ORDER BY over a plain scan.
    let sorted = SelectStmt {
        projections: vec![Projection::Wildcard],
        from: "orders".into(),
        joins: vec![],
        predicates: vec![],
        group_by: vec![],
        order_by: vec![OrderByItem {
            column: ColumnRef::bare("amount"),
            ascending: false,
        }],
        limit: Some(2),
    };
    let top = db.execute(&Statement::Select(sorted)).unwrap().to_rows();
    assert_eq!(top[0][1], Value::Integer(20));
    assert_eq!(top[1][1], Value::Integer(10));
}
