//! Index registry.
//!
//! Tracks available secondary indexes as `(table, column, kind)` triples
//! and answers "best index for this predicate". The registry is
//! copy-on-write: lookups clone an `Arc` of the current definition list,
//! so planning never blocks DDL and vice versa.

use basalt_core::ast::{CompareOp, IndexKind};
use parking_lot::RwLock;
use std::sync::Arc;

/// One registered index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub column: String,
    pub kind: IndexKind,
}

/// Copy-on-write registry of index definitions.
#[derive(Default)]
pub struct IndexRegistry {
    defs: RwLock<Arc<Vec<IndexDef>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        IndexRegistry::default()
    }

    /// Immutable snapshot of the current definitions.
    pub fn snapshot(&self) -> Arc<Vec<IndexDef>> {
        Arc::clone(&self.defs.read())
    }

    /// Register an index. Returns false when the name is taken.
    pub fn create(&self, def: IndexDef) -> bool {
        let mut guard = self.defs.write();
        if guard.iter().any(|d| d.name == def.name) {
            return false;
        }
        let mut next = guard.as_ref().clone();
        next.push(def);
        *guard = Arc::new(next);
        true
    }

    /// Remove an index by name. Returns false when absent.
    pub fn drop_index(&self, name: &str) -> bool {
        let mut guard = self.defs.write();
        if !guard.iter().any(|d| d.name == name) {
            return false;
        }
        let next: Vec<IndexDef> = guard.iter().filter(|d| d.name != name).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    /// Remove every index on `table` (DROP TABLE cascade).
    pub fn drop_table(&self, table: &str) {
        let mut guard = self.defs.write();
        let next: Vec<IndexDef> = guard.iter().filter(|d| d.table != table).cloned().collect();
        *guard = Arc::new(next);
    }

    /// Exact-match lookup.
    pub fn lookup(&self, table: &str, column: &str) -> Option<IndexDef> {
        self.defs
            .read()
            .iter()
            .find(|d| d.table == table && d.column == column)
            .cloned()
    }

    /// Whether an index with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.defs.read().iter().any(|d| d.name == name)
    }

    /// Best index able to serve `op` against `(table, column)`.
    ///
    /// Ordered indexes serve everything; hash indexes serve equality
    /// only. Ordered wins ties because it also covers later range reuse.
    pub fn best_for(&self, table: &str, column: &str, op: CompareOp) -> Option<IndexDef> {
        let defs = self.snapshot();
        let mut best: Option<&IndexDef> = None;
        for def in defs.iter() {
            if def.table != table || def.column != column {
                continue;
            }
            let usable = match def.kind {
                IndexKind::Ordered => true,
                IndexKind::Hash => op == CompareOp::Eq,
            };
            if !usable {
                continue;
            }
            best = match best {
                Some(current) if current.kind == IndexKind::Ordered => Some(current),
                _ => Some(def),
            };
        }
        best.cloned()
    }
}
