//! Cloned snapshot view.

use basalt_core::error::Result;
use basalt_core::traits::KvSnapshot;
use std::collections::BTreeMap;

/// Snapshot backed by a full clone of the tree at creation time.
///
/// Cloning keeps the implementation simple and the isolation obvious; a
/// persistent backend would substitute a version-bounded view behind the
/// same trait.
pub struct ClonedSnapshot {
    tree: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ClonedSnapshot {
    pub fn new(tree: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        ClonedSnapshot { tree }
    }

    /// Snapshot of nothing; handy in tests.
    pub fn empty() -> Self {
        ClonedSnapshot {
            tree: BTreeMap::new(),
        }
    }
}

impl KvSnapshot for ClonedSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(crate::mem::scan_tree(&self.tree, prefix))
    }
}
