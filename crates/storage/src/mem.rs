//! Ordered in-memory store.

use crate::snapshot::ClonedSnapshot;
use basalt_core::error::Result;
use basalt_core::traits::{KvSnapshot, KvStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// BTreeMap-backed store with reader/writer locking.
///
/// Readers take the shared lock; writers the exclusive lock. Snapshots
/// clone the tree under the shared lock, so an open snapshot never blocks
/// subsequent writes.
#[derive(Default)]
pub struct MemStore {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Drop every key. Used by state transfer when installing a snapshot.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

/// Upper bound key for a prefix scan: the prefix with its last byte
/// incremented, or unbounded if the prefix is all 0xFF.
fn prefix_upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
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

pub(crate) fn scan_tree(
    tree: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let range = (Bound::Included(prefix.to_vec()), prefix_upper_bound(prefix));
    tree.range::<Vec<u8>, _>((range.0, range.1))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.map.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan_tree(&self.map.read(), prefix))
    }

    fn snapshot(&self) -> Box<dyn KvSnapshot> {
        Box::new(ClonedSnapshot::new(self.map.read().clone()))
    }
}
