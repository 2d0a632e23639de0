//! Write-ahead log and durability machinery.
//!
//! The WAL is the engine's durability boundary: a transaction is committed
//! once its `Commit` record (preceded by all of its `Write` records) is
//! durable on disk. This crate owns:
//!
//! - the record codec (`record`): length-prefixed, CRC-tailed frames
//! - segment files (`segment`): header, tail marker, rotation
//! - the writer (`writer`): LSN assignment, fsync modes, rotation
//! - the reader (`reader`): forward scan that stops at the first torn or
//!   corrupt record
//! - recovery (`recovery`): commit-matched replay into the storage
//!   adapter, checkpointing, segment retention
//! - backups (`backup`): manifest + data + wal directory layout, verify,
//!   restore, point-in-time recovery

pub mod backup;
pub mod record;
pub mod reader;
pub mod recovery;
pub mod segment;
pub mod snapshot;
pub mod writer;

pub use backup::{create_backup, recover_from_backup, verify_backup, BackupManifest};
pub use reader::{ReadOutcome, Truncation, WalReader};
pub use record::WalRecord;
pub use recovery::{install_checkpoint, recover, replay, replay_until, CheckpointState, RecoveryReport};
pub use snapshot::{load_snapshot, write_snapshot};
pub use writer::{SyncPolicy, WalWriter, WalWriterConfig};
