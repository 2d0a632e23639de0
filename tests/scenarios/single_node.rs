//! Single-node SQL scenarios.

use crate::{create_users, open_db};
use basalt_durability::{WalReader, WalRecord};
use basaltdb::ast::{SelectStmt, Statement};
use basaltdb::Value;
use tempfile::TempDir;

#[test]
fn test_insert_then_select_in_insertion_order() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);

    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![
            vec![Value::Integer(1), Value::text("alice")],
            vec![Value::Integer(2), Value::text("bob")],
        ],
    })
    .unwrap();

    let result = db
        .execute(&Statement::Select(SelectStmt::scan_all("users")))
        .unwrap();
    assert_eq!(result.row_count, 2);
    let rows = result.to_rows();
    assert_eq!(rows[0], vec![Value::Integer(1), Value::text("alice")]);
    assert_eq!(rows[1], vec![Value::Integer(2), Value::text("bob")]);
}

#[test]
fn test_insert_transaction_wal_shape() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        create_users(&db);
        db.execute(&Statement::Insert {
            table: "users".into(),
            columns: vec![],
            rows: vec![
                vec![Value::Integer(1), Value::text("alice")],
                vec![Value::Integer(2), Value::text("bob")],
            ],
        })
        .unwrap();
    }

    let outcome = WalReader::open(dir.path().join("wal"))
        .unwrap()
        .read_all()
        .unwrap();
    assert!(outcome.truncation.is_none());

    // The insert is the last transaction in the log: one Begin, two
    // Writes, one Commit.
    let insert_tx = outcome
        .records
        .iter()
        .rev()
        .find_map(|r| match r {
            WalRecord::Begin { tx_id, .. } => Some(*tx_id),
            _ => None,
        })
        .expect("insert transaction in WAL");
    let shape: Vec<&str> = outcome
        .records
        .iter()
        .filter(|r| r.tx_id() == Some(insert_tx))
        .map(|r| match r {
            WalRecord::Begin { .. } => "begin",
            WalRecord::Write { .. } => "write",
            WalRecord::Commit { .. } => "commit",
            WalRecord::Abort { .. } => "abort",
            WalRecord::Checkpoint { .. } => "checkpoint",
        })
        .collect();
    assert_eq!(shape, vec!["begin", "write", "write", "commit"]);
}

#[test]
fn test_unknown_relation_is_reported() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    let err = db
        .execute(&Statement::Select(SelectStmt::scan_all("missing")))
        .unwrap_err();
    assert!(matches!(err, basaltdb::Error::UnknownRelation(_)));
}

#[test]
fn test_update_and_delete_round_trip() {
    use basaltdb::ast::{ColumnRef, CompareOp, Predicate};
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    create_users(&db);
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![
            vec![Value::Integer(1), Value::text("alice")],
            vec![Value::Integer(2), Value::text("bob")],
        ],
    })
    .unwrap();

    let updated = db
        .execute(&Statement::Update {
            table: "users".into(),
            assignments: vec![("name".into(), Value::text("carol"))],
            predicates: vec![Predicate::new(
                ColumnRef::bare("id"),
                CompareOp::Eq,
                Value::Integer(2),
            )],
        })
        .unwrap();
    assert_eq!(updated.to_rows()[0], vec![Value::Integer(1)]);

    db.execute(&Statement::Delete {
        table: "users".into(),
        predicates: vec![Predicate::new(
            ColumnRef::bare("id"),
            CompareOp::Eq,
            Value::Integer(1),
        )],
    })
    .unwrap();

    let rows = db
        .execute(&Statement::Select(SelectStmt::scan_all("users")))
        .unwrap()
        .to_rows();
    assert_eq!(rows, vec![vec![Value::Integer(2), Value::text("carol")]]);
}
