//! Storage adapter traits.
//!
//! The engine sees the key-value backend only through these traits: an
//! ordered byte-key store with point operations, prefix scans, and
//! consistent snapshots. The in-memory implementation lives in
//! `basalt-storage`; the contract is the seam a persistent engine would
//! plug into.
//!
//! The adapter must be crash-consistent at the record level: a `put` either
//! happened entirely or not at all after a crash. Durability across crashes
//! is the WAL's job, not the adapter's.

use crate::error::Result;

/// Ordered byte-key store.
///
/// All methods are safe to call concurrently; writes are serialized
/// internally by the implementation.
pub trait KvStore: Send + Sync {
    /// Latest value for `key`, if present.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite `key`.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key
    /// order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Consistent point-in-time view of the store.
    fn snapshot(&self) -> Box<dyn KvSnapshot>;
}

/// Immutable view of the store at snapshot time.
pub trait KvSnapshot: Send + Sync {
    /// Value for `key` as of the snapshot.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Prefix scan as of the snapshot, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // The traits must stay object-safe: the engine passes them around as
    // `&dyn KvStore` / `Box<dyn KvSnapshot>`.
    #[allow(dead_code)]
    fn assert_object_safe(_store: &dyn KvStore, _snap: &dyn KvSnapshot) {}

    #[test]
    fn test_traits_are_object_safe() {
        // Compilation of `assert_object_safe` is the test.
    }
}
