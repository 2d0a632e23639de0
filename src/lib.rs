//! # BasaltDB
//!
//! An analytical database engine core: cost-based SQL planning with
//! optional accelerator off-load, MVCC transactions over a write-ahead
//! log, viewstamped replication for linearizable key-value state, and a
//! deterministic simulation harness for fault-injection testing.
//!
//! # Quick Start
//!
//! ```no_run
//! use basaltdb::ast::{ColumnDef, SelectStmt, Statement};
//! use basaltdb::{Database, DataType, EngineConfig, Value};
//!
//! fn main() -> basaltdb::Result<()> {
//!     let db = Database::open(EngineConfig::at("./basalt-data"))?;
//!
//!     db.execute(&Statement::CreateTable {
//!         name: "users".into(),
//!         columns: vec![
//!             ColumnDef { name: "id".into(), dtype: DataType::Int64 },
//!             ColumnDef { name: "name".into(), dtype: DataType::Utf8 },
//!         ],
//!     })?;
//!     db.execute(&Statement::Insert {
//!         table: "users".into(),
//!         columns: vec![],
//!         rows: vec![vec![Value::Integer(1), Value::text("alice")]],
//!     })?;
//!
//!     let rows = db.execute(&Statement::Select(SelectStmt::scan_all("users")))?;
//!     assert_eq!(rows.row_count, 1);
//!     Ok(())
//! }
//! ```
//!
//! # Crate layout
//!
//! | Crate | Concern |
//! |-------|---------|
//! | `basalt-core` | Values, columns, result sets, AST contract, errors |
//! | `basalt-storage` | Ordered KV adapter with snapshots |
//! | `basalt-durability` | WAL, recovery, checkpoints, backups |
//! | `basalt-concurrency` | MVCC transactions and isolation |
//! | `basalt-planner` | Statistics, cost model, optimizer |
//! | `basalt-executor` | Columnar kernels and accelerator staging |
//! | `basalt-repl` | Viewstamped replication |
//! | `basalt-sim` | Deterministic simulation harness |
//! | `basalt-engine` | The `Database` facade |
//!
//! Only the surface re-exported here is considered stable.

pub use basalt_core::ast;
pub use basalt_core::column::Column;
pub use basalt_core::error::{Error, Result};
pub use basalt_core::result::ResultSet;
pub use basalt_core::value::{DataType, Value};

pub use basalt_concurrency::IsolationLevel;
pub use basalt_engine::{init_tracing, Checkpointer, Database, EngineConfig};

/// Replication layer: cluster state machine and simulation harness.
pub mod replication {
    pub use basalt_repl::{
        quorum, KvOp, LogEntry, Message, ReplyStatus, Request, Role, SimCluster, VrConfig,
        VrNode,
    };
}

/// Deterministic simulation harness.
pub mod simulation {
    pub use basalt_sim::{
        seed_from_env, Event, NetworkConfig, NodeClock, Scheduler, SimDisk, SimNetwork,
    };
}

/// Durability toolbox: backups and point-in-time recovery.
pub mod durability {
    pub use basalt_durability::{
        create_backup, recover_from_backup, verify_backup, BackupManifest,
    };
}
