//! Transaction state.
//!
//! A `Transaction` tracks identity, snapshot, isolation, buffered write
//! set, and read set. Status moves through exactly one terminal
//! transition: `Active → Preparing → Committed`, or `Active/Preparing →
//! Aborted`; anything else is rejected.

use basalt_core::error::{Error, Result};
use basalt_core::types::{Ts, TxnId};
use std::collections::HashMap;

/// Isolation levels, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Reads see the latest version, committed or not
    ReadUncommitted,
    /// Each read picks a fresh snapshot (no dirty reads)
    ReadCommitted,
    /// All reads share the transaction's snapshot
    RepeatableRead,
    /// RepeatableRead plus commit-time validation of the read set
    Serializable,
}

impl IsolationLevel {
    /// Whether reads must be tracked for commit-time validation.
    pub fn tracks_reads(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Preparing,
    Committed,
    Aborted,
}

/// One buffered mutation: the new value (None = delete) and the byte
/// length of the version it supersedes, recorded in the WAL for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteIntent {
    pub value: Option<Vec<u8>>,
    pub prev_len: Option<u32>,
}

/// In-flight transaction.
#[derive(Debug)]
pub struct Transaction {
    pub id: TxnId,
    pub snapshot_ts: Ts,
    pub commit_ts: Option<Ts>,
    pub status: TxnStatus,
    pub isolation: IsolationLevel,
    /// key → intent, applied at commit in key order
    pub write_set: HashMap<Vec<u8>, WriteIntent>,
    /// key → begin_ts of the version read (`None` = key was absent)
    pub read_set: HashMap<Vec<u8>, Option<Ts>>,
    /// Whether a `Begin` record has been appended for this transaction
    pub logged_begin: bool,
}

impl Transaction {
    pub fn new(id: TxnId, snapshot_ts: Ts, isolation: IsolationLevel) -> Self {
        Transaction {
            id,
            snapshot_ts,
            commit_ts: None,
            status: TxnStatus::Active,
            isolation,
            write_set: HashMap::new(),
            read_set: HashMap::new(),
            logged_begin: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TxnStatus::Active
    }

    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Reject operations against finished or preparing transactions.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidTransactionState(format!(
                "transaction {} is {:?}",
                self.id, self.status
            )))
        }
    }

    /// `Active → Preparing`.
    pub fn mark_preparing(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = TxnStatus::Preparing;
        Ok(())
    }

    /// `Preparing → Committed`, stamping the commit timestamp.
    pub fn mark_committed(&mut self, commit_ts: Ts) -> Result<()> {
        if self.status != TxnStatus::Preparing {
            return Err(Error::InvalidTransactionState(format!(
                "cannot commit transaction {} from {:?}",
                self.id, self.status
            )));
        }
        self.status = TxnStatus::Committed;
        self.commit_ts = Some(commit_ts);
        Ok(())
    }

    /// `Active | Preparing → Aborted`.
    pub fn mark_aborted(&mut self) -> Result<()> {
        match self.status {
            TxnStatus::Active | TxnStatus::Preparing => {
                self.status = TxnStatus::Aborted;
                self.write_set.clear();
                Ok(())
            }
            _ => Err(Error::InvalidTransactionState(format!(
                "cannot abort transaction {} from {:?}",
                self.id, self.status
            ))),
        }
    }
}
