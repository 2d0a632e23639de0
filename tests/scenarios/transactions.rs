//! MVCC isolation scenarios.

use crate::{create_users, open_db};
use basaltdb::ast::{ColumnRef, CompareOp, Predicate, SelectStmt, Statement};
use basaltdb::{Error, IsolationLevel, Value};
use tempfile::TempDir;

fn select_name(id: i64) -> Statement {
    let mut stmt = SelectStmt::scan_all("users");
    stmt.predicates.push(Predicate::new(
        ColumnRef::bare("id"),
        CompareOp::Eq,
        Value::Integer(id),
    ));
    Statement::Select(stmt)
}

fn update_name(id: i64, name: &str) -> Statement {
    Statement::Update {
        table: "users".into(),
        assignments: vec![("name".into(), Value::text(name))],
        predicates: vec![Predicate::new(
            ColumnRef::bare("id"),
            CompareOp::Eq,
            Value::Integer(id),
        )],
    }
}

#[test]
fn test_repeatable_read_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![vec![Value::Integer(1), Value::text("v1")]],
    })
    .unwrap();

    // Tx A reads under RepeatableRead.
    let a = db.begin(IsolationLevel::RepeatableRead);
    let first = db.execute_in(a, &select_name(1)).unwrap().to_rows();
    assert_eq!(first[0][1], Value::text("v1"));

    // Tx B overwrites and commits.
    let b = db.begin(IsolationLevel::RepeatableRead);
    db.execute_in(b, &update_name(1, "v2")).unwrap();
    db.commit(b).unwrap();

    // A still sees its snapshot.
    let second = db.execute_in(a, &select_name(1)).unwrap().to_rows();
    assert_eq!(second[0][1], Value::text("v1"));
    db.commit(a).unwrap();

    // A fresh transaction sees the overwrite.
    let third = db.execute(&select_name(1)).unwrap().to_rows();
    assert_eq!(third[0][1], Value::text("v2"));
}

#[test]
fn test_read_committed_sees_fresh_commits() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![vec![Value::Integer(1), Value::text("v1")]],
    })
    .unwrap();

    let a = db.begin(IsolationLevel::ReadCommitted);
    assert_eq!(
        db.execute_in(a, &select_name(1)).unwrap().to_rows()[0][1],
        Value::text("v1")
    );

    let b = db.begin(IsolationLevel::ReadCommitted);
    db.execute_in(b, &update_name(1, "v2")).unwrap();
    db.commit(b).unwrap();

    // Unlike RepeatableRead, each statement re-snapshots.
    assert_eq!(
        db.execute_in(a, &select_name(1)).unwrap().to_rows()[0][1],
        Value::text("v2")
    );
    db.commit(a).unwrap();
}

#[test]
fn test_later_writer_gets_write_conflict() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![vec![Value::Integer(1), Value::text("base")]],
    })
    .unwrap();

    let a = db.begin(IsolationLevel::RepeatableRead);
    let b = db.begin(IsolationLevel::RepeatableRead);
    db.execute_in(a, &update_name(1, "from-a")).unwrap();

    // B writes the same row while A's version is uncommitted.
    let err = db.execute_in(b, &update_name(1, "from-b")).unwrap_err();
    assert!(matches!(err, Error::WriteConflict { .. }));
    db.abort(b).unwrap();

    // The earlier writer commits fine.
    db.commit(a).unwrap();
    let rows = db.execute(&select_name(1)).unwrap().to_rows();
    assert_eq!(rows[0][1], Value::text("from-a"));
}

#[test]
fn test_serializable_rejects_stale_read_set() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![
            vec![Value::Integer(1), Value::text("x")],
            vec![Value::Integer(2), Value::text("y")],
        ],
    })
    .unwrap();

    // A reads row 1, then writes row 2 based on it.
    let a = db.begin(IsolationLevel::Serializable);
    let _ = db.execute_in(a, &select_name(1)).unwrap();
    db.execute_in(a, &update_name(2, "based-on-1")).unwrap();

    // B overwrites row 1 and commits first.
    let b = db.begin(IsolationLevel::Serializable);
    db.execute_in(b, &update_name(1, "changed")).unwrap();
    db.commit(b).unwrap();

    let err = db.commit(a).unwrap_err();
    assert!(matches!(err, Error::SerializationFailure(_)));
}

#[test]
fn test_abort_discards_all_effects() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);

    let tx = db.begin(IsolationLevel::RepeatableRead);
    db.execute_in(
        tx,
        &Statement::Insert {
            table: "users".into(),
            columns: vec![],
            rows: vec![vec![Value::Integer(9), Value::text("ghost")]],
        },
    )
    .unwrap();
    db.abort(tx).unwrap();

    let rows = db
        .execute(&Statement::Select(SelectStmt::scan_all("users")))
        .unwrap();
    assert_eq!(rows.row_count, 0);
}
