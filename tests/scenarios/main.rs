//! End-to-end scenario suite.
//!
//! Each module exercises one subsystem boundary through the public
//! surface: single-node SQL over the WAL, MVCC isolation, crash
//! recovery, planner behavior, and the replicated cluster under the
//! simulation harness.

mod cluster;
mod planning;
mod recovery;
mod single_node;
mod transactions;

use basaltdb::ast::{ColumnDef, Statement};
use basaltdb::{Database, DataType, EngineConfig};
use std::path::Path;

/// Open a database with test-friendly settings in `dir`.
pub fn open_db(dir: &Path) -> Database {
    let mut config = EngineConfig::at(dir);
    config.sync_every_write = true;
    Database::open(config).unwrap()
}

/// CREATE TABLE users(id INT, name TEXT).
pub fn create_users(db: &Database) {
    db.execute(&Statement::CreateTable {
        name: "users".into(),
        columns: vec![
            ColumnDef {
                name: "id".into(),
                dtype: DataType::Int64,
            },
            ColumnDef {
                name: "name".into(),
                dtype: DataType::Utf8,
            },
        ],
    })
    .unwrap();
}
