//! Transaction manager.
//!
//! Coordinates the commit protocol across the version store, the WAL, and
//! the storage adapter:
//!
//! ```text
//! begin()                 allocate id, pick snapshot_ts, register Active
//! write()                 conflict-check, WAL Write, install uncommitted
//! commit()                Preparing -> validate -> WAL Commit + fsync
//!                         (DURABILITY POINT) -> promote versions ->
//!                         apply to storage -> Committed
//! abort()                 rollback versions, WAL Abort, Aborted
//! ```
//!
//! Commits run inside a single critical section so validation and version
//! promotion cannot interleave with another commit's promotion. Reads
//! never take the commit lock.

use crate::oracle::Oracle;
use crate::transaction::{IsolationLevel, Transaction, TxnStatus, WriteIntent};
use crate::version::VersionStore;
use basalt_core::error::{Error, Result};
use basalt_core::traits::KvStore;
use basalt_core::types::{Ts, TxnId};
use basalt_durability::recovery::CheckpointState;
use basalt_durability::{WalRecord, WalWriter};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transaction manager owning the MVCC state and the WAL writer.
pub struct TransactionManager {
    oracle: Oracle,
    versions: VersionStore,
    store: Arc<dyn KvStore>,
    wal: Option<Mutex<WalWriter>>,
    active: DashMap<TxnId, Mutex<Transaction>>,
    /// Serializes validate-promote-apply across commits
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// Create a manager over `store`, resuming counters after recovery
    /// watermarks. Pass `wal: None` for ephemeral databases.
    pub fn new(
        store: Arc<dyn KvStore>,
        wal: Option<WalWriter>,
        max_txn_id: TxnId,
        max_ts: Ts,
    ) -> Self {
        TransactionManager {
            oracle: Oracle::new(max_txn_id, max_ts),
            versions: VersionStore::new(),
            store,
            wal: wal.map(Mutex::new),
            active: DashMap::new(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Open a transaction at the given isolation level.
    pub fn begin(&self, isolation: IsolationLevel) -> TxnId {
        let id = self.oracle.next_txn_id();
        let snapshot_ts = self.oracle.now_ts();
        self.active
            .insert(id, Mutex::new(Transaction::new(id, snapshot_ts, isolation)));
        tracing::debug!(txn_id = id, snapshot_ts, ?isolation, "begin");
        id
    }

    /// Read `key` under the transaction's isolation rules.
    pub fn read(&self, tx_id: TxnId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entry = self.require(tx_id)?;
        let mut tx = entry.lock();
        tx.ensure_active()?;

        // Read-your-writes.
        if let Some(intent) = tx.write_set.get(key) {
            return Ok(intent.value.clone());
        }

        if tx.isolation == IsolationLevel::ReadUncommitted {
            if let Some(latest) = self.versions.read_latest(key) {
                return Ok(latest);
            }
            return self.store.get(key);
        }

        let snapshot = match tx.isolation {
            IsolationLevel::ReadCommitted => self.oracle.now_ts(),
            _ => tx.snapshot_ts,
        };
        let (value, seen) = match self.versions.read_at(key, snapshot) {
            Some(value) => {
                let seen = self
                    .versions
                    .latest_committed_ts(key)
                    .filter(|ts| *ts <= snapshot);
                (value, seen)
            }
            // No chain: the storage value has been committed since before
            // this manager opened, visible to every snapshot.
            None => {
                let v = self.store.get(key)?;
                let seen = v.as_ref().map(|_| 0);
                (v, seen)
            }
        };
        if tx.isolation.tracks_reads() {
            tx.read_set.insert(key.to_vec(), seen);
        }
        Ok(value)
    }

    /// Buffer a write (or delete, with `value: None`).
    ///
    /// Fails with `WriteConflict` when another in-flight transaction holds
    /// the latest uncommitted version: first writer wins, the later one
    /// retries.
    pub fn write(&self, tx_id: TxnId, key: &[u8], value: Option<Vec<u8>>) -> Result<()> {
        let entry = self.require(tx_id)?;
        let mut tx = entry.lock();
        tx.ensure_active()?;

        let base = if self.versions.has_chain(key) {
            None
        } else {
            self.store.get(key)?
        };
        let prev_len = match &base {
            Some(bytes) => Some(bytes.len() as u32),
            None => self
                .versions
                .read_at(key, self.oracle.now_ts())
                .flatten()
                .map(|v| v.len() as u32),
        };

        // Conflict check and install are one atomic step: first writer
        // wins, the loser aborts and retries.
        if let Err(holder) =
            self.versions
                .try_install_uncommitted(key, value.clone(), tx_id, base)
        {
            tracing::debug!(txn_id = tx_id, holder, "write conflict");
            return Err(Error::WriteConflict {
                key: String::from_utf8_lossy(key).into_owned(),
                holder,
            });
        }

        if let Some(wal) = &self.wal {
            let mut wal = wal.lock();
            if !tx.logged_begin {
                wal.append(&WalRecord::Begin {
                    tx_id,
                    snapshot_ts: tx.snapshot_ts,
                })?;
                tx.logged_begin = true;
            }
            wal.append(&WalRecord::Write {
                tx_id,
                key: key.to_vec(),
                value: value.clone(),
                prev_len,
            })?;
        } else {
            tx.logged_begin = true;
        }

        tx.write_set
            .insert(key.to_vec(), WriteIntent { value, prev_len });
        Ok(())
    }

    /// Scan all keys under `prefix` visible to the transaction, own
    /// writes included, in key order.
    pub fn scan(&self, tx_id: TxnId, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entry = self.require(tx_id)?;
        let mut tx = entry.lock();
        tx.ensure_active()?;

        let snapshot = match tx.isolation {
            IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => {
                self.oracle.now_ts()
            }
            _ => tx.snapshot_ts,
        };

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for (key, value) in self.store.scan_prefix(prefix)? {
            merged.insert(key, Some(value));
        }
        // Version chains override the committed tree for every key they
        // cover, tombstones included.
        for (key, value) in self.versions.scan_at(prefix, snapshot) {
            merged.insert(key, value);
        }
        for (key, intent) in &tx.write_set {
            if key.starts_with(prefix) {
                merged.insert(key.clone(), intent.value.clone());
            }
        }

        if tx.isolation.tracks_reads() {
            for key in merged.keys() {
                if !tx.write_set.contains_key(key) {
                    let seen = self
                        .versions
                        .latest_committed_ts(key)
                        .filter(|ts| *ts <= snapshot)
                        .or(Some(0));
                    tx.read_set.insert(key.clone(), seen);
                }
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    /// Commit the transaction, returning its commit timestamp.
    pub fn commit(&self, tx_id: TxnId) -> Result<Ts> {
        let entry = self.require(tx_id)?;
        let result = {
            let mut tx = entry.lock();
            self.commit_locked(&mut tx)
        };
        // Release the map reference before removal; holding it across
        // `remove` would deadlock the shard.
        drop(entry);
        self.active.remove(&tx_id);
        result
    }

    fn commit_locked(&self, tx: &mut Transaction) -> Result<Ts> {
        tx.mark_preparing()?;

        // Read-only transactions have nothing to validate or persist: no
        // writer can have invalidated a pure snapshot read under MVCC.
        if tx.is_read_only() {
            let ts = tx.snapshot_ts;
            tx.mark_committed(ts)?;
            return Ok(ts);
        }

        let _guard = self.commit_lock.lock();

        if tx.isolation == IsolationLevel::Serializable {
            if let Err(e) = self.validate_serializable(tx) {
                self.rollback_locked(tx)?;
                return Err(e);
            }
        }

        let commit_ts = self.oracle.next_ts();
        if let Some(wal) = &self.wal {
            let mut wal = wal.lock();
            wal.append(&WalRecord::Commit {
                tx_id: tx.id,
                commit_ts,
            })?;
            // Durability point: the commit record is on disk before any
            // effect becomes visible.
            wal.sync()?;
        }

        self.versions.promote(tx.id, commit_ts);
        let mut keys: Vec<_> = tx.write_set.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let intent = &tx.write_set[&key];
            match &intent.value {
                Some(v) => self.store.put(key.clone(), v.clone())?,
                None => self.store.delete(&key)?,
            }
        }
        tx.mark_committed(commit_ts)?;
        tracing::debug!(txn_id = tx.id, commit_ts, "committed");
        Ok(commit_ts)
    }

    /// SSI-style validation: fail if any key in the read set has been
    /// overwritten by a commit after our snapshot.
    fn validate_serializable(&self, tx: &Transaction) -> Result<()> {
        for key in tx.read_set.keys() {
            if let Some(ts) = self.versions.latest_committed_ts(key) {
                if ts > tx.snapshot_ts {
                    return Err(Error::SerializationFailure(format!(
                        "read of {:?} overwritten at ts {ts} (snapshot {})",
                        String::from_utf8_lossy(key),
                        tx.snapshot_ts
                    )));
                }
            }
        }
        Ok(())
    }

    /// Abort the transaction, discarding its uncommitted versions.
    pub fn abort(&self, tx_id: TxnId) -> Result<()> {
        let entry = self.require(tx_id)?;
        let result = {
            let mut tx = entry.lock();
            self.rollback_locked(&mut tx)
        };
        drop(entry);
        self.active.remove(&tx_id);
        result
    }

    fn rollback_locked(&self, tx: &mut Transaction) -> Result<()> {
        self.versions.rollback(tx.id);
        if tx.logged_begin {
            if let Some(wal) = &self.wal {
                wal.lock().append(&WalRecord::Abort { tx_id: tx.id })?;
            }
        }
        tx.mark_aborted()?;
        tracing::debug!(txn_id = tx.id, "aborted");
        Ok(())
    }

    /// Block commits for the duration of the returned guard. The engine
    /// holds this while persisting a storage snapshot so the snapshot
    /// and the subsequent checkpoint record agree on what committed.
    pub fn quiesce(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Append a checkpoint and vacuum dead versions.
    ///
    /// `storage_is_durable` asserts that the committed tree has been
    /// persisted (the engine writes its snapshot first); only then may
    /// old WAL segments be dropped, and only while no in-flight
    /// transaction has records in them.
    pub fn checkpoint(&self, storage_is_durable: bool) -> Result<CheckpointState> {
        let min_active_snapshot = self
            .active
            .iter()
            .map(|e| e.value().lock().snapshot_ts)
            .min();
        let min_active_id = self.active.iter().map(|e| *e.key()).min();
        let any_active_logged = self
            .active
            .iter()
            .any(|e| e.value().lock().logged_begin);

        let tx_id_watermark = match min_active_id {
            Some(id) => id.saturating_sub(1),
            None => self.oracle.last_txn_id(),
        };
        let ts_watermark = self.oracle.now_ts();

        if let Some(wal) = &self.wal {
            let mut wal = wal.lock();
            wal.append(&WalRecord::Checkpoint {
                tx_id_watermark,
                ts_watermark,
            })?;
            wal.sync()?;
            // Old segments may still hold Write records of in-flight
            // transactions, or the only copy of committed data when no
            // snapshot exists; either condition blocks retention.
            if storage_is_durable && !any_active_logged {
                let current = wal.current_segment();
                wal.retain_from(current)?;
            }
        }
        let horizon = min_active_snapshot.unwrap_or(ts_watermark);
        let dropped = self.versions.vacuum(horizon);
        tracing::info!(tx_id_watermark, ts_watermark, dropped, "checkpoint");
        Ok(CheckpointState {
            tx_id_watermark,
            ts_watermark,
        })
    }

    /// Snapshot timestamp of an open transaction.
    pub fn snapshot_ts(&self, tx_id: TxnId) -> Result<Ts> {
        Ok(self.require(tx_id)?.lock().snapshot_ts)
    }

    /// Status of an open transaction, if still tracked.
    pub fn status(&self, tx_id: TxnId) -> Option<TxnStatus> {
        self.active.get(&tx_id).map(|e| e.lock().status.clone())
    }

    /// Count of in-flight transactions.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Current logical time.
    pub fn now_ts(&self) -> Ts {
        self.oracle.now_ts()
    }

    /// WAL writer handle, when durability is enabled.
    pub fn wal(&self) -> Option<&Mutex<WalWriter>> {
        self.wal.as_ref()
    }

    /// The storage adapter this manager applies commits to.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn require(
        &self,
        tx_id: TxnId,
    ) -> Result<dashmap::mapref::one::Ref<'_, TxnId, Mutex<Transaction>>> {
        self.active.get(&tx_id).ok_or_else(|| {
            Error::InvalidTransactionState(format!("transaction {tx_id} is not active"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_durability::WalWriterConfig;
    use basalt_storage::MemStore;
    use tempfile::TempDir;

    fn manager_with_wal(dir: &std::path::Path) -> TransactionManager {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let wal = WalWriter::open(dir, [0u8; 16], WalWriterConfig::for_testing(), 1).unwrap();
        TransactionManager::new(store, Some(wal), 0, 0)
    }

    fn ephemeral() -> TransactionManager {
        TransactionManager::new(Arc::new(MemStore::new()), None, 0, 0)
    }

    #[test]
    fn test_commit_applies_to_storage() {
        let dir = TempDir::new().unwrap();
        let mgr = manager_with_wal(dir.path());
        let tx = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(tx, b"k", Some(b"v".to_vec())).unwrap();
        let ts = mgr.commit(tx).unwrap();
        assert!(ts > 0);
        assert_eq!(mgr.store().get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_repeatable_read_ignores_later_commits() {
        let mgr = ephemeral();
        // Seed k = v1.
        let setup = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(setup, b"k", Some(b"v1".to_vec())).unwrap();
        mgr.commit(setup).unwrap();

        let a = mgr.begin(IsolationLevel::RepeatableRead);
        assert_eq!(mgr.read(a, b"k").unwrap(), Some(b"v1".to_vec()));

        let b = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(b, b"k", Some(b"v2".to_vec())).unwrap();
        mgr.commit(b).unwrap();

        // A still sees v1.
        assert_eq!(mgr.read(a, b"k").unwrap(), Some(b"v1".to_vec()));
        mgr.commit(a).unwrap();

        // A fresh transaction sees v2.
        let c = mgr.begin(IsolationLevel::RepeatableRead);
        assert_eq!(mgr.read(c, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_read_committed_sees_later_commits() {
        let mgr = ephemeral();
        let a = mgr.begin(IsolationLevel::ReadCommitted);
        assert_eq!(mgr.read(a, b"k").unwrap(), None);

        let b = mgr.begin(IsolationLevel::ReadCommitted);
        mgr.write(b, b"k", Some(b"v".to_vec())).unwrap();
        mgr.commit(b).unwrap();

        // Each statement re-snapshots.
        assert_eq!(mgr.read(a, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_read_uncommitted_sees_in_flight_writes() {
        let mgr = ephemeral();
        let writer = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(writer, b"k", Some(b"dirty".to_vec())).unwrap();

        let reader = mgr.begin(IsolationLevel::ReadUncommitted);
        assert_eq!(mgr.read(reader, b"k").unwrap(), Some(b"dirty".to_vec()));

        // Committed levels do not.
        let clean = mgr.begin(IsolationLevel::ReadCommitted);
        assert_eq!(mgr.read(clean, b"k").unwrap(), None);
    }

    #[test]
    fn test_later_writer_conflicts() {
        let mgr = ephemeral();
        let a = mgr.begin(IsolationLevel::RepeatableRead);
        let b = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(a, b"k", Some(b"a".to_vec())).unwrap();

        let err = mgr.write(b, b"k", Some(b"b".to_vec())).unwrap_err();
        match err {
            Error::WriteConflict { holder, .. } => assert_eq!(holder, a),
            other => panic!("expected WriteConflict, got {other:?}"),
        }
        // Earlier writer commits fine.
        mgr.commit(a).unwrap();
        assert_eq!(mgr.store().get(b"k").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_conflict_clears_after_commit() {
        let mgr = ephemeral();
        let a = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(a, b"k", Some(b"a".to_vec())).unwrap();
        mgr.commit(a).unwrap();

        let b = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(b, b"k", Some(b"b".to_vec())).unwrap();
        mgr.commit(b).unwrap();
        assert_eq!(mgr.store().get(b"k").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_serializable_validation_rejects_overwritten_read() {
        let mgr = ephemeral();
        let setup = mgr.begin(IsolationLevel::Serializable);
        mgr.write(setup, b"k", Some(b"v1".to_vec())).unwrap();
        mgr.commit(setup).unwrap();

        let a = mgr.begin(IsolationLevel::Serializable);
        let _ = mgr.read(a, b"k").unwrap();
        mgr.write(a, b"other", Some(b"x".to_vec())).unwrap();

        let b = mgr.begin(IsolationLevel::Serializable);
        mgr.write(b, b"k", Some(b"v2".to_vec())).unwrap();
        mgr.commit(b).unwrap();

        let err = mgr.commit(a).unwrap_err();
        assert!(matches!(err, Error::SerializationFailure(_)));
        // A's write was rolled back.
        assert_eq!(mgr.store().get(b"other").unwrap(), None);
    }

    #[test]
    fn test_write_skew_prevented_under_serializable() {
        let mgr = ephemeral();
        let setup = mgr.begin(IsolationLevel::Serializable);
        mgr.write(setup, b"x", Some(b"1".to_vec())).unwrap();
        mgr.write(setup, b"y", Some(b"1".to_vec())).unwrap();
        mgr.commit(setup).unwrap();

        // Classic skew: each reads the other's key, writes its own.
        let a = mgr.begin(IsolationLevel::Serializable);
        let b = mgr.begin(IsolationLevel::Serializable);
        let _ = mgr.read(a, b"y").unwrap();
        let _ = mgr.read(b, b"x").unwrap();
        mgr.write(a, b"x", Some(b"0".to_vec())).unwrap();
        mgr.write(b, b"y", Some(b"0".to_vec())).unwrap();

        mgr.commit(a).unwrap();
        let err = mgr.commit(b).unwrap_err();
        assert!(matches!(err, Error::SerializationFailure(_)));
    }

    #[test]
    fn test_repeatable_read_skew_is_permitted() {
        // Same interleaving as above commits cleanly one level down.
        let mgr = ephemeral();
        let a = mgr.begin(IsolationLevel::RepeatableRead);
        let b = mgr.begin(IsolationLevel::RepeatableRead);
        let _ = mgr.read(a, b"y").unwrap();
        let _ = mgr.read(b, b"x").unwrap();
        mgr.write(a, b"x", Some(b"0".to_vec())).unwrap();
        mgr.write(b, b"y", Some(b"0".to_vec())).unwrap();
        mgr.commit(a).unwrap();
        mgr.commit(b).unwrap();
    }

    #[test]
    fn test_abort_discards_writes() {
        let dir = TempDir::new().unwrap();
        let mgr = manager_with_wal(dir.path());
        let tx = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(tx, b"k", Some(b"v".to_vec())).unwrap();
        mgr.abort(tx).unwrap();
        assert_eq!(mgr.store().get(b"k").unwrap(), None);

        // Key is free for the next writer.
        let tx2 = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(tx2, b"k", Some(b"w".to_vec())).unwrap();
        mgr.commit(tx2).unwrap();
        assert_eq!(mgr.store().get(b"k").unwrap(), Some(b"w".to_vec()));
    }

    #[test]
    fn test_scan_merges_writes_and_tombstones() {
        let mgr = ephemeral();
        let setup = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(setup, b"p/a", Some(b"1".to_vec())).unwrap();
        mgr.write(setup, b"p/b", Some(b"2".to_vec())).unwrap();
        mgr.commit(setup).unwrap();

        let tx = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(tx, b"p/b", None).unwrap(); // delete
        mgr.write(tx, b"p/c", Some(b"3".to_vec())).unwrap();
        let rows = mgr.scan(tx, b"p/").unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"p/a".to_vec(), b"p/c".to_vec()]);
    }

    #[test]
    fn test_operations_on_finished_txn_fail() {
        let mgr = ephemeral();
        let tx = mgr.begin(IsolationLevel::ReadCommitted);
        mgr.commit(tx).unwrap();
        assert!(mgr.read(tx, b"k").is_err());
        assert!(mgr.write(tx, b"k", None).is_err());
        assert!(mgr.commit(tx).is_err());
    }

    #[test]
    fn test_wal_contains_begin_writes_commit() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = manager_with_wal(dir.path());
            let tx = mgr.begin(IsolationLevel::RepeatableRead);
            mgr.write(tx, b"a", Some(b"1".to_vec())).unwrap();
            mgr.write(tx, b"b", Some(b"2".to_vec())).unwrap();
            mgr.commit(tx).unwrap();
        }
        let outcome = basalt_durability::WalReader::open(dir.path())
            .unwrap()
            .read_all()
            .unwrap();
        let kinds: Vec<_> = outcome
            .records
            .iter()
            .map(|r| match r {
                WalRecord::Begin { .. } => "begin",
                WalRecord::Write { .. } => "write",
                WalRecord::Commit { .. } => "commit",
                WalRecord::Abort { .. } => "abort",
                WalRecord::Checkpoint { .. } => "checkpoint",
            })
            .collect();
        assert_eq!(kinds, vec!["begin", "write", "write", "commit"]);
    }

    #[test]
    fn test_read_only_txn_writes_no_wal() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = manager_with_wal(dir.path());
            let tx = mgr.begin(IsolationLevel::Serializable);
            let _ = mgr.read(tx, b"k").unwrap();
            mgr.commit(tx).unwrap();
        }
        let outcome = basalt_durability::WalReader::open(dir.path())
            .unwrap()
            .read_all()
            .unwrap();
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_checkpoint_records_watermarks() {
        let dir = TempDir::new().unwrap();
        let mgr = manager_with_wal(dir.path());
        let tx = mgr.begin(IsolationLevel::RepeatableRead);
        mgr.write(tx, b"k", Some(b"v".to_vec())).unwrap();
        mgr.commit(tx).unwrap();

        let state = mgr.checkpoint(false).unwrap();
        assert_eq!(state.tx_id_watermark, 1);
        assert_eq!(state.ts_watermark, 1);
    }
}
