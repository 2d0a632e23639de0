//! Crash recovery replay.
//!
//! Replay rules:
//! - scan from the last `Checkpoint`: transactions at or below its
//!   watermark are already reflected in the storage tree
//! - re-apply every `Write` whose transaction has a `Commit` in the log
//! - discard `Write`s of transactions with no matching `Commit` (torn at
//!   the crash) or with an `Abort`
//! - re-application is idempotent: puts overwrite, deletes of absent keys
//!   are no-ops, so replaying a log twice equals replaying it once
//!
//! A torn or corrupt tail is physically truncated before replay and the
//! data-loss window is surfaced in the report.

use crate::reader::{Truncation, WalReader};
use crate::record::WalRecord;
use crate::writer::WalWriter;
use basalt_core::error::Result;
use basalt_core::traits::KvStore;
use basalt_core::types::{Lsn, Ts, TxnId};
use std::collections::HashMap;
use std::path::Path;

/// Watermarks carried by the most recent checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointState {
    pub tx_id_watermark: TxnId,
    pub ts_watermark: Ts,
}

/// What recovery found and did.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Highest transaction id seen anywhere in the log
    pub max_txn_id: TxnId,
    /// Highest timestamp (snapshot or commit) seen in the log
    pub max_ts: Ts,
    /// LSN the writer should resume from
    pub next_lsn: Lsn,
    /// Committed transactions replayed into storage
    pub replayed: usize,
    /// Transactions whose writes were discarded (no commit, or aborted)
    pub discarded: usize,
    /// Set when the log had to be truncated
    pub truncation: Option<Truncation>,
    /// Last checkpoint found, if any
    pub checkpoint: Option<CheckpointState>,
}

/// Scan the WAL in `dir`, truncate any corrupt tail, and replay committed
/// transactions into `store`.
pub fn recover(dir: &Path, store: &dyn KvStore) -> Result<RecoveryReport> {
    let reader = WalReader::open(dir)?;
    let outcome = reader.read_all()?;
    if let Some(t) = &outcome.truncation {
        // Cut the log at the offending record so the next scan is clean.
        reader.truncate_at(t)?;
    }
    let mut report = replay(&outcome.records, store)?;
    report.truncation = outcome.truncation;
    Ok(report)
}

/// Replay an in-memory record sequence into `store`. Exposed separately
/// for point-in-time recovery, which replays a bounded prefix.
pub fn replay(records: &[WalRecord], store: &dyn KvStore) -> Result<RecoveryReport> {
    replay_until(records, store, None)
}

/// Replay committed transactions with `commit_ts <= target` when a target
/// is given; replay stops before the first commit past the target.
pub fn replay_until(
    records: &[WalRecord],
    store: &dyn KvStore,
    target_ts: Option<Ts>,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        next_lsn: records.len() as Lsn + 1,
        ..RecoveryReport::default()
    };

    // Last checkpoint wins; everything at or below its watermark is
    // already in the storage tree.
    for record in records {
        if let WalRecord::Checkpoint {
            tx_id_watermark,
            ts_watermark,
        } = record
        {
            report.checkpoint = Some(CheckpointState {
                tx_id_watermark: *tx_id_watermark,
                ts_watermark: *ts_watermark,
            });
        }
    }
    let watermark = report.checkpoint.map(|c| c.tx_id_watermark).unwrap_or(0);

    let mut pending: HashMap<TxnId, Vec<&WalRecord>> = HashMap::new();
    for record in records {
        match record {
            WalRecord::Begin { tx_id, snapshot_ts } => {
                report.max_txn_id = report.max_txn_id.max(*tx_id);
                report.max_ts = report.max_ts.max(*snapshot_ts);
                pending.entry(*tx_id).or_default();
            }
            WalRecord::Write { tx_id, .. } => {
                report.max_txn_id = report.max_txn_id.max(*tx_id);
                pending.entry(*tx_id).or_default().push(record);
            }
            WalRecord::Abort { tx_id } => {
                report.max_txn_id = report.max_txn_id.max(*tx_id);
                if pending.remove(tx_id).is_some() {
                    report.discarded += 1;
                }
            }
            WalRecord::Commit { tx_id, commit_ts } => {
                report.max_txn_id = report.max_txn_id.max(*tx_id);
                report.max_ts = report.max_ts.max(*commit_ts);
                if let Some(target) = target_ts {
                    if *commit_ts > target {
                        // Point-in-time boundary: stop before this commit.
                        break;
                    }
                }
                let writes = pending.remove(tx_id).unwrap_or_default();
                if *tx_id <= watermark {
                    // Already durable in the tree; re-application would be
                    // safe but is unnecessary.
                    continue;
                }
                for write in writes {
                    if let WalRecord::Write { key, value, .. } = write {
                        match value {
                            Some(v) => store.put(key.clone(), v.clone())?,
                            None => store.delete(key)?,
                        }
                    }
                }
                report.replayed += 1;
            }
            WalRecord::Checkpoint { .. } => {}
        }
    }
    // Whatever never committed is discarded.
    report.discarded += pending.len();
    if report.replayed > 0 || report.discarded > 0 {
        tracing::info!(
            replayed = report.replayed,
            discarded = report.discarded,
            max_txn_id = report.max_txn_id,
            "wal replay complete"
        );
    }
    Ok(report)
}

/// Append a fresh checkpoint recording the post-recovery watermarks.
pub fn install_checkpoint(writer: &mut WalWriter, report: &RecoveryReport) -> Result<Lsn> {
    writer.append(&WalRecord::Checkpoint {
        tx_id_watermark: report.max_txn_id,
        ts_watermark: report.max_ts,
    })
}
