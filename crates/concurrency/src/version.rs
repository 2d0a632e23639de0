//! MVCC version chains.
//!
//! Each touched key carries a chain of versions ordered newest-first.
//! A version is visible to a reader at snapshot `S` when
//! `begin_ts <= S < end_ts`; an uncommitted version carries the
//! `TS_INFINITY` placeholder as its `begin_ts` until promotion.
//!
//! Chains are populated lazily: the first write against a key captures the
//! storage adapter's committed value as the chain's base (visible since
//! time zero). Keys never written since open are answered straight from
//! storage by the manager.

use basalt_core::types::{Ts, TxnId, TS_INFINITY};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// One entry in a key's version chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Payload bytes; `None` is a tombstone
    pub value: Option<Vec<u8>>,
    /// Transaction that wrote this version (0 for storage-seeded bases)
    pub writer: TxnId,
    /// Commit timestamp, or `TS_INFINITY` while uncommitted
    pub begin_ts: Ts,
    /// Timestamp of the superseding commit, `TS_INFINITY` while live
    pub end_ts: Ts,
}

impl Version {
    pub fn is_committed(&self) -> bool {
        self.begin_ts != TS_INFINITY
    }

    /// Visibility rule: `begin_ts <= snapshot < end_ts`.
    pub fn visible_at(&self, snapshot: Ts) -> bool {
        self.is_committed() && self.begin_ts <= snapshot && snapshot < self.end_ts
    }
}

/// Concurrent map of key → version chain (newest first).
#[derive(Default)]
pub struct VersionStore {
    chains: RwLock<BTreeMap<Vec<u8>, Vec<Version>>>,
}

impl VersionStore {
    pub fn new() -> Self {
        VersionStore::default()
    }

    /// Whether any chain exists for `key`.
    pub fn has_chain(&self, key: &[u8]) -> bool {
        self.chains.read().contains_key(key)
    }

    /// The writer of the latest uncommitted version, if any.
    pub fn uncommitted_writer(&self, key: &[u8]) -> Option<TxnId> {
        let chains = self.chains.read();
        let chain = chains.get(key)?;
        chain
            .first()
            .filter(|v| !v.is_committed())
            .map(|v| v.writer)
    }

    /// Install or replace `writer`'s uncommitted version of `key`,
    /// failing with the holder's id when another in-flight transaction
    /// already owns the latest uncommitted version. The conflict check
    /// and the install share one lock acquisition, so two racing writers
    /// can never both install.
    ///
    /// `base` seeds the chain with the storage adapter's committed value
    /// when this is the first touch of the key.
    pub fn try_install_uncommitted(
        &self,
        key: &[u8],
        value: Option<Vec<u8>>,
        writer: TxnId,
        base: Option<Vec<u8>>,
    ) -> std::result::Result<(), TxnId> {
        let mut chains = self.chains.write();
        let chain = chains.entry(key.to_vec()).or_insert_with(|| {
            match base {
                Some(bytes) => vec![Version {
                    value: Some(bytes),
                    writer: 0,
                    begin_ts: 0,
                    end_ts: TS_INFINITY,
                }],
                None => Vec::new(),
            }
        });
        match chain.first_mut() {
            Some(head) if !head.is_committed() && head.writer == writer => {
                // Same transaction overwrote its own write.
                head.value = value;
            }
            Some(head) if !head.is_committed() => return Err(head.writer),
            _ => chain.insert(
                0,
                Version {
                    value,
                    writer,
                    begin_ts: TS_INFINITY,
                    end_ts: TS_INFINITY,
                },
            ),
        }
        Ok(())
    }

    /// `try_install_uncommitted` for callers that have already excluded
    /// conflicts (tests and single-writer paths).
    #[cfg(test)]
    pub(crate) fn install_uncommitted(
        &self,
        key: &[u8],
        value: Option<Vec<u8>>,
        writer: TxnId,
        base: Option<Vec<u8>>,
    ) {
        self.try_install_uncommitted(key, value, writer, base)
            .expect("no conflicting writer in test setup");
    }

    /// Value visible at `snapshot` for `key`, or `None` when the chain has
    /// no visible version. The outer `Option` distinguishes "no chain"
    /// from "chain says absent".
    pub fn read_at(&self, key: &[u8], snapshot: Ts) -> Option<Option<Vec<u8>>> {
        let chains = self.chains.read();
        let chain = chains.get(key)?;
        for v in chain {
            if v.visible_at(snapshot) {
                return Some(v.value.clone());
            }
        }
        Some(None)
    }

    /// Latest version including uncommitted ones (ReadUncommitted).
    pub fn read_latest(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let chains = self.chains.read();
        let chain = chains.get(key)?;
        Some(chain.first().and_then(|v| v.value.clone()))
    }

    /// Begin timestamp of the latest committed version, if the chain has
    /// one. Used by SSI validation.
    pub fn latest_committed_ts(&self, key: &[u8]) -> Option<Ts> {
        let chains = self.chains.read();
        let chain = chains.get(key)?;
        chain.iter().find(|v| v.is_committed()).map(|v| v.begin_ts)
    }

    /// Promote `writer`'s uncommitted versions to `commit_ts`, closing the
    /// superseded committed versions. One write-lock acquisition makes the
    /// transition atomic with respect to readers.
    pub fn promote(&self, writer: TxnId, commit_ts: Ts) {
        let mut chains = self.chains.write();
        for chain in chains.values_mut() {
            if let Some(head) = chain.first_mut() {
                if !head.is_committed() && head.writer == writer {
                    head.begin_ts = commit_ts;
                    // Close the previous live version.
                    if let Some(prev) = chain.iter_mut().nth(1) {
                        if prev.end_ts == TS_INFINITY {
                            prev.end_ts = commit_ts;
                        }
                    }
                }
            }
        }
    }

    /// Remove `writer`'s uncommitted versions (abort path).
    pub fn rollback(&self, writer: TxnId) {
        let mut chains = self.chains.write();
        chains.retain(|_, chain| {
            chain.retain(|v| v.is_committed() || v.writer != writer);
            !chain.is_empty()
        });
    }

    /// All keys with chains under `prefix`, with their visible value at
    /// `snapshot` (tombstones included as `None`).
    pub fn scan_at(&self, prefix: &[u8], snapshot: Ts) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        let chains = self.chains.read();
        let upper = prefix_upper(prefix);
        let range = chains.range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), upper));
        let mut out = Vec::new();
        for (key, chain) in range {
            let visible = chain.iter().find(|v| v.visible_at(snapshot));
            out.push((key.clone(), visible.and_then(|v| v.value.clone())));
        }
        out
    }

    /// Drop closed versions no longer visible to any snapshot at or after
    /// `horizon`. Chains reduced to only their base entry are kept; the
    /// base mirrors storage.
    pub fn vacuum(&self, horizon: Ts) -> usize {
        let mut chains = self.chains.write();
        let mut dropped = 0;
        for chain in chains.values_mut() {
            let before = chain.len();
            chain.retain(|v| v.end_ts == TS_INFINITY || v.end_ts > horizon || !v.is_committed());
            dropped += before - chain.len();
        }
        chains.retain(|_, chain| !chain.is_empty());
        dropped
    }
}

fn prefix_upper(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Bound::Excluded(upper);
        }
        upper.pop();
    }
    Bound::Unbounded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_invisible_to_snapshots() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"v1".to_vec()), 1, None);
        assert_eq!(store.read_at(b"k", 100), Some(None));
        assert_eq!(store.read_latest(b"k"), Some(Some(b"v1".to_vec())));
        assert_eq!(store.uncommitted_writer(b"k"), Some(1));
    }

    #[test]
    fn test_promote_makes_visible_at_commit_ts() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"v1".to_vec()), 1, None);
        store.promote(1, 10);
        assert_eq!(store.read_at(b"k", 9), Some(None));
        assert_eq!(store.read_at(b"k", 10), Some(Some(b"v1".to_vec())));
        assert_eq!(store.latest_committed_ts(b"k"), Some(10));
    }

    #[test]
    fn test_superseded_version_closed_at_commit() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"v1".to_vec()), 1, None);
        store.promote(1, 10);
        store.install_uncommitted(b"k", Some(b"v2".to_vec()), 2, None);
        store.promote(2, 20);
        // Old snapshot still sees v1, new one sees v2.
        assert_eq!(store.read_at(b"k", 15), Some(Some(b"v1".to_vec())));
        assert_eq!(store.read_at(b"k", 20), Some(Some(b"v2".to_vec())));
    }

    #[test]
    fn test_base_seed_visible_since_zero() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"new".to_vec()), 5, Some(b"base".to_vec()));
        assert_eq!(store.read_at(b"k", 0), Some(Some(b"base".to_vec())));
        store.promote(5, 50);
        assert_eq!(store.read_at(b"k", 49), Some(Some(b"base".to_vec())));
        assert_eq!(store.read_at(b"k", 50), Some(Some(b"new".to_vec())));
    }

    #[test]
    fn test_rollback_removes_uncommitted_only() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"v1".to_vec()), 1, None);
        store.promote(1, 10);
        store.install_uncommitted(b"k", Some(b"v2".to_vec()), 2, None);
        store.rollback(2);
        assert_eq!(store.uncommitted_writer(b"k"), None);
        assert_eq!(store.read_at(b"k", 10), Some(Some(b"v1".to_vec())));
    }

    #[test]
    fn test_tombstone_reads_as_absent() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"v1".to_vec()), 1, None);
        store.promote(1, 10);
        store.install_uncommitted(b"k", None, 2, None);
        store.promote(2, 20);
        assert_eq!(store.read_at(b"k", 20), Some(None));
        assert_eq!(store.read_at(b"k", 10), Some(Some(b"v1".to_vec())));
    }

    #[test]
    fn test_own_rewrite_replaces_in_place() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"a".to_vec()), 1, None);
        store.install_uncommitted(b"k", Some(b"b".to_vec()), 1, None);
        store.promote(1, 10);
        assert_eq!(store.read_at(b"k", 10), Some(Some(b"b".to_vec())));
        // Only one committed version exists.
        assert_eq!(store.latest_committed_ts(b"k"), Some(10));
    }

    #[test]
    fn test_scan_at_respects_visibility() {
        let store = VersionStore::new();
        store.install_uncommitted(b"a/1", Some(b"x".to_vec()), 1, None);
        store.install_uncommitted(b"a/2", Some(b"y".to_vec()), 1, None);
        store.promote(1, 10);
        store.install_uncommitted(b"a/3", Some(b"z".to_vec()), 2, None);

        let at_10 = store.scan_at(b"a/", 10);
        assert_eq!(at_10.len(), 3);
        assert_eq!(at_10[0].1, Some(b"x".to_vec()));
        assert_eq!(at_10[2].1, None); // a/3 uncommitted

        let at_5 = store.scan_at(b"a/", 5);
        assert!(at_5.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_vacuum_drops_closed_history() {
        let store = VersionStore::new();
        store.install_uncommitted(b"k", Some(b"v1".to_vec()), 1, None);
        store.promote(1, 10);
        store.install_uncommitted(b"k", Some(b"v2".to_vec()), 2, None);
        store.promote(2, 20);
        let dropped = store.vacuum(30);
        assert_eq!(dropped, 1);
        assert_eq!(store.read_at(b"k", 30), Some(Some(b"v2".to_vec())));
    }
}
