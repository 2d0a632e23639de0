//! Transaction id and timestamp oracle.
//!
//! Both counters are logical: timestamps define the serial order of
//! commits, not wall-clock time. Snapshot timestamps read the current
//! value; commit timestamps advance it, so every commit gets a unique
//! position in the order.

use basalt_core::types::{Ts, TxnId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id/timestamp source shared by all transactions.
pub struct Oracle {
    next_txn_id: AtomicU64,
    clock: AtomicU64,
}

impl Oracle {
    /// Start counting after recovered high-water marks so restarted
    /// engines never reuse an id or timestamp.
    pub fn new(max_txn_id: TxnId, max_ts: Ts) -> Self {
        Oracle {
            next_txn_id: AtomicU64::new(max_txn_id),
            clock: AtomicU64::new(max_ts),
        }
    }

    /// Allocate the next transaction id.
    ///
    /// # Panics
    /// Panics on counter overflow (`u64::MAX` transactions).
    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("transaction id counter overflow")
            + 1
    }

    /// Current logical time; used for snapshot timestamps.
    pub fn now_ts(&self) -> Ts {
        self.clock.load(Ordering::SeqCst)
    }

    /// Advance the clock and return the new value; used for commit
    /// timestamps.
    ///
    /// # Panics
    /// Panics on clock overflow.
    pub fn next_ts(&self) -> Ts {
        self.clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("timestamp counter overflow")
            + 1
    }

    /// Last allocated transaction id.
    pub fn last_txn_id(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst)
    }
}

impl Default for Oracle {
    fn default() -> Self {
        Oracle::new(0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_timestamps_are_monotonic() {
        let oracle = Oracle::default();
        assert_eq!(oracle.next_txn_id(), 1);
        assert_eq!(oracle.next_txn_id(), 2);
        assert_eq!(oracle.now_ts(), 0);
        assert_eq!(oracle.next_ts(), 1);
        assert_eq!(oracle.next_ts(), 2);
        assert_eq!(oracle.now_ts(), 2);
    }

    #[test]
    fn test_recovery_resumes_past_watermarks() {
        let oracle = Oracle::new(41, 99);
        assert_eq!(oracle.next_txn_id(), 42);
        assert_eq!(oracle.next_ts(), 100);
    }
}
