//! Engine integration tests: DDL, index maintenance, statistics, and
//! query execution through the full stack.

use basalt_core::ast::{
    AlterAction, ColumnDef, ColumnRef, CompareOp, FrameSpec, IndexKind, Predicate, Projection,
    SelectStmt, Statement, WindowExpr, WindowFunc,
};
use basalt_core::value::{DataType, Value};
use basalt_engine::{Database, EngineConfig};
use tempfile::TempDir;

fn db_at(dir: &TempDir) -> Database {
    Database::open(EngineConfig::at(dir.path())).unwrap()
}

fn create_events(db: &Database) {
    db.execute(&Statement::CreateTable {
        name: "events".into(),
        columns: vec![
            ColumnDef {
                name: "id".into(),
                dtype: DataType::Int64,
            },
            ColumnDef {
                name: "kind".into(),
                dtype: DataType::Utf8,
            },
            ColumnDef {
                name: "weight".into(),
                dtype: DataType::Int64,
            },
        ],
    })
    .unwrap();
}

fn insert_event(db: &Database, id: i64, kind: &str, weight: i64) {
    db.execute(&Statement::Insert {
        table: "events".into(),
        columns: vec![],
        rows: vec![vec![
            Value::Integer(id),
            Value::text(kind),
            Value::Integer(weight),
        ]],
    })
    .unwrap();
}

#[test]
fn test_create_table_twice_is_constraint_violation() {
    let dir = TempDir::new().unwrap();
    let db = db_at(&dir);
    create_events(&db);
    let err = db
        .execute(&Statement::CreateTable {
            name: "events".into(),
            columns: vec![ColumnDef {
                name: "id".into(),
                dtype: DataType::Int64,
            }],
        })
        .unwrap_err();
    assert!(matches!(err, basalt_core::Error::ConstraintViolation(_)));
}

#[test]
fn test_drop_table_removes_rows_and_schema() {
    let dir = TempDir::new().unwrap();
    let db = db_at(&dir);
    create_events(&db);
    insert_event(&db, 1, "click", 5);
    db.execute(&Statement::DropTable {
        name: "events".into(),
    })
    .unwrap();
    let err = db
        .execute(&Statement::Select(SelectStmt::scan_all("events")))
        .unwrap_err();
    assert!(matches!(err, basalt_core::Error::UnknownRelation(_)));
}

#[test]
fn test_alter_table_add_and_drop_column() {
    let dir = TempDir::new().unwrap();
    let db = db_at(&dir);
    create_events(&db);
    insert_event(&db, 1, "click", 5);

    // New column reads as Null for pre-existing rows.
    db.execute(&Statement::AlterTable {
        name: "events".into(),
        action: AlterAction::AddColumn(ColumnDef {
            name: "source".into(),
            dtype: DataType::Utf8,
        }),
    })
    .unwrap();
    let rows = db
        .execute(&Statement::Select(SelectStmt::scan_all("events")))
        .unwrap()
        .to_rows();
    assert_eq!(rows[0].len(), 4);
    assert_eq!(rows[0][3], Value::Null);

    // Dropping a middle column shifts the remainder.
    db.execute(&Statement::AlterTable {
        name: "events".into(),
        action: AlterAction::DropColumn("kind".into()),
    })
    .unwrap();
    let rows = db
        .execute(&Statement::Select(SelectStmt::scan_all("events")))
        .unwrap()
        .to_rows();
    assert_eq!(
        rows[0],
        vec![Value::Integer(1), Value::Integer(5), Value::Null]
    );
}

#[test]
fn test_index_maintained_across_update_and_delete() {
    let dir = TempDir::new().unwrap();
    let db = db_at(&dir);
    create_events(&db);
    insert_event(&db, 1, "click", 5);
    insert_event(&db, 2, "view", 6);
    db.execute(&Statement::CreateIndex {
        name: "events_weight".into(),
        table: "events".into(),
        column: "weight".into(),
        kind: IndexKind::Ordered,
    })
    .unwrap();

    // Update moves the indexed value: seeks find the new one only.
    db.execute(&Statement::Update {
        table: "events".into(),
        assignments: vec![("weight".into(), Value::Integer(50))],
        predicates: vec![Predicate::new(
            ColumnRef::bare("id"),
            CompareOp::Eq,
            Value::Integer(1),
        )],
    })
    .unwrap();

    let seek = |weight: i64| {
        let mut stmt = SelectStmt::scan_all("events");
        stmt.predicates.push(Predicate::new(
            ColumnRef::qualified("events", "weight"),
            CompareOp::Eq,
            Value::Integer(weight),
        ));
        db.execute(&Statement::Select(stmt)).unwrap().row_count
    };
    assert_eq!(seek(5), 0);
    assert_eq!(seek(50), 1);

    // Delete removes the entry.
    db.execute(&Statement::Delete {
        table: "events".into(),
        predicates: vec![Predicate::new(
            ColumnRef::bare("id"),
            CompareOp::Eq,
            Value::Integer(1),
        )],
    })
    .unwrap();
    assert_eq!(seek(50), 0);
    assert_eq!(seek(6), 1);
}

#[test]
fn test_indexes_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let db = db_at(&dir);
        create_events(&db);
        insert_event(&db, 1, "click", 5);
        db.execute(&Statement::CreateIndex {
            name: "events_weight".into(),
            table: "events".into(),
            column: "weight".into(),
            kind: IndexKind::Ordered,
        })
        .unwrap();
    }
    let db = db_at(&dir);
    let mut stmt = SelectStmt::scan_all("events");
    stmt.predicates.push(Predicate::new(
        ColumnRef::qualified("events", "weight"),
        CompareOp::Eq,
        Value::Integer(5),
    ));
    // The planner still sees the index after replay.
    assert!(db.explain(&stmt).unwrap().contains("IndexSeek"));
    assert_eq!(db.execute(&Statement::Select(stmt)).unwrap().row_count, 1);
}

#[test]
fn test_statistics_refresh_feeds_selectivity() {
    let dir = TempDir::new().unwrap();
    let db = db_at(&dir);
    create_events(&db);
    for id in 0..100 {
        insert_event(&db, id, "k", id % 10);
    }
    db.refresh_statistics("events").unwrap();
    let stats = db.stats();
    assert_eq!(stats.row_count("events"), 100);
    let weight = stats.column_stats("events", "weight").unwrap();
    assert_eq!(weight.ndv, 10);
    assert_eq!(weight.min, Some(Value::Integer(0)));
    assert_eq!(weight.max, Some(Value::Integer(9)));
}

#[test]
fn test_window_function_through_sql() {
    let dir = TempDir::new().unwrap();
    let db = db_at(&dir);
    create_events(&db);
    insert_event(&db, 1, "a", 10);
    insert_event(&db, 2, "a", 30);
    insert_event(&db, 3, "b", 20);

    let stmt = SelectStmt {
        projections: vec![Projection::Window(WindowExpr {
            func: WindowFunc::RowNumber,
            arg: None,
            partition_by: vec![ColumnRef::bare("kind")],
            order_by: vec![basalt_core::ast::OrderByItem {
                column: ColumnRef::bare("weight"),
                ascending: true,
            }],
            frame: FrameSpec::default(),
        })],
        from: "events".into(),
        joins: vec![],
        predicates: vec![],
        group_by: vec![],
        order_by: vec![],
        limit: None,
    };
    let result = db.execute(&Statement::Select(stmt)).unwrap();
    // Row count preserved; the computed column is appended.
    assert_eq!(result.row_count, 3);
    let numbers = result.column("row_number()").unwrap();
    let rows = result.to_rows();
    // Partition "a": weights 10, 30 -> rows 1, 2. Partition "b": row 1.
    for (i, row) in rows.iter().enumerate() {
        let expected = match (row[1].clone(), row[2].clone()) {
            (k, Value::Integer(10)) if k == Value::text("a") => 1,
            (k, Value::Integer(30)) if k == Value::text("a") => 2,
            _ => 1,
        };
        assert_eq!(numbers.value(i), Value::Integer(expected));
    }
}

#[test]
fn test_second_open_of_locked_dir_fails() {
    let dir = TempDir::new().unwrap();
    let _db = db_at(&dir);
    let err = Database::open(EngineConfig::at(dir.path())).unwrap_err();
    assert!(matches!(err, basalt_core::Error::ConstraintViolation(_)));
}
