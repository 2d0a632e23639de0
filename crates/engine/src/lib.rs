//! The Basalt database engine.
//!
//! `Database` is the facade tying the subsystems together: statements
//! enter, the planner consults the statistics catalog and index
//! registry, the executor reads through an MVCC snapshot, and writes
//! flow through the transaction manager into the WAL and storage
//! adapter. Opening a database runs crash recovery; a background
//! checkpointer bounds replay work.

pub mod background;
pub mod catalog;
pub mod config;
pub mod database;
pub mod provider;

pub use background::Checkpointer;
pub use catalog::{TableCatalog, TableSchema};
pub use config::EngineConfig;
pub use database::Database;

/// Install a global `tracing` subscriber writing human-readable output
/// to stderr. Call once at process start; later calls are no-ops.
///
/// Log verbosity follows `RUST_LOG` (default `info`).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
