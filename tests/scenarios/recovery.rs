//! Crash recovery and backup scenarios.

use crate::{create_users, open_db};
use basaltdb::ast::{SelectStmt, Statement};
use basaltdb::durability::verify_backup;
use basaltdb::{Database, EngineConfig, Value};
use tempfile::TempDir;

fn insert_one(db: &Database, id: i64, name: &str) {
    db.execute(&Statement::Insert {
        table: "users".into(),
        columns: vec![],
        rows: vec![vec![Value::Integer(id), Value::text(name)]],
    })
    .unwrap();
}

fn all_rows(db: &Database) -> Vec<Vec<Value>> {
    db.execute(&Statement::Select(SelectStmt::scan_all("users")))
        .unwrap()
        .to_rows()
}

#[test]
fn test_committed_inserts_survive_crash() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        create_users(&db);
        insert_one(&db, 1, "a");
        insert_one(&db, 2, "b");
        insert_one(&db, 3, "c");
        // Dropped without a checkpoint: recovery must replay the WAL.
    }
    let db = open_db(dir.path());
    let rows = all_rows(&db);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2], vec![Value::Integer(3), Value::text("c")]);
}

#[test]
fn test_torn_wal_tail_loses_only_the_tail() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        create_users(&db);
        insert_one(&db, 1, "a");
        insert_one(&db, 2, "b");
    }
    // Tear the final bytes of the newest segment, as a crash mid-write
    // would.
    let wal_dir = dir.path().join("wal");
    let mut segments: Vec<_> = std::fs::read_dir(&wal_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    segments.sort();
    let last = segments.last().unwrap();
    let len = std::fs::metadata(last).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(last)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    let db = open_db(dir.path());
    let rows = all_rows(&db);
    // The second insert's commit was torn; the first survives.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::Integer(1));

    // The engine keeps working after the loss.
    insert_one(&db, 3, "c");
    assert_eq!(all_rows(&db).len(), 2);
}

#[test]
fn test_schema_survives_crash() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        create_users(&db);
    }
    let db = open_db(dir.path());
    // The table exists and accepts inserts after replay.
    insert_one(&db, 1, "a");
    assert_eq!(all_rows(&db).len(), 1);
}

#[test]
fn test_backup_verify_and_restore_round_trip() {
    let data_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let restore_dir = TempDir::new().unwrap();

    let db = open_db(data_dir.path());
    create_users(&db);
    insert_one(&db, 1, "a");
    insert_one(&db, 2, "b");
    let manifest = db.backup(backup_dir.path()).unwrap();
    assert!(manifest.files.len() >= 2);

    verify_backup(backup_dir.path()).unwrap();

    let restored = Database::restore(
        backup_dir.path(),
        EngineConfig::at(restore_dir.path()),
        None,
    )
    .unwrap();
    let rows = all_rows(&restored);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], vec![Value::Integer(2), Value::text("b")]);
}

#[test]
fn test_point_in_time_recovery_stops_at_target() {
    let data_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let restore_dir = TempDir::new().unwrap();

    let db = open_db(data_dir.path());
    create_users(&db);
    insert_one(&db, 1, "a");
    // The backup captures the state through insert 1.
    db.backup(backup_dir.path()).unwrap();

    // Commit timestamp of the second insert becomes the PITR target;
    // insert 3 lands past it.
    let cutoff = {
        let tx = db.begin(basaltdb::IsolationLevel::Serializable);
        db.execute_in(
            tx,
            &Statement::Insert {
                table: "users".into(),
                columns: vec![],
                rows: vec![vec![Value::Integer(2), Value::text("b")]],
            },
        )
        .unwrap();
        db.commit(tx).unwrap()
    };
    insert_one(&db, 3, "after-target");
    drop(db);

    // Restore the backup, replaying the live WAL up to the target.
    let restored = Database::restore_with_wal(
        backup_dir.path(),
        EngineConfig::at(restore_dir.path()),
        Some(cutoff),
        Some(&data_dir.path().join("wal")),
    )
    .unwrap();
    let rows = all_rows(&restored);
    let ids: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
    assert!(ids.contains(&Value::Integer(1)));
    assert!(ids.contains(&Value::Integer(2)));
    assert!(!ids.contains(&Value::Integer(3)));
}
