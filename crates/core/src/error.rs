//! Error types for the Basalt engine.
//!
//! One unified error enum covers the whole engine, grouped into five
//! categories that determine how callers react:
//!
//! - **Input errors** are reported to the caller unchanged.
//! - **Concurrency errors** are safe to retry (`is_retryable`).
//! - **Resource errors** degrade: accelerator exhaustion falls back to the
//!   CPU path, host exhaustion sheds load.
//! - **Integrity errors** are fatal to the affected unit (a log file, a
//!   backup) but never to the engine as a whole.
//! - **Protocol errors** are handled inside the replication layer and only
//!   surface for diagnostics.
//!
//! We use `thiserror` for `Display`/`Error` derivation throughout.

use std::io;
use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all Basalt operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Input errors ---
    /// Referenced table does not exist.
    #[error("unknown relation: {0}")]
    UnknownRelation(String),

    /// Referenced column does not exist on the relation.
    #[error("unknown column: {table}.{column}")]
    UnknownColumn {
        /// Table the reference was resolved against
        table: String,
        /// Column name that failed to resolve
        column: String,
    },

    /// Operand types are incompatible with the operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Statement could not be parsed into a valid AST shape.
    #[error("syntax error: {0}")]
    SyntaxError(String),

    /// Schema constraint violated (duplicate table, arity mismatch, ...).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    // --- Concurrency errors ---
    /// Another in-flight transaction holds the latest version of the key.
    #[error("write conflict on key {key:?} with transaction {holder}")]
    WriteConflict {
        /// Conflicting key (user-visible form)
        key: String,
        /// Transaction id holding the uncommitted version
        holder: u64,
    },

    /// Serializable validation failed at commit.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// Operation exceeded its deadline.
    #[error("timeout after {0} virtual time units")]
    Timeout(u64),

    /// Request sent to a replica that is not the primary.
    #[error("not primary (current view {view})")]
    NotPrimary {
        /// View the replica believes is current
        view: u64,
    },

    // --- Resource errors ---
    /// Accelerator device memory exhausted; caller falls back to CPU.
    #[error("out of accelerator memory: requested {requested} bytes")]
    OutOfAcceleratorMemory {
        /// Allocation size that failed
        requested: usize,
    },

    /// Host memory budget exhausted.
    #[error("out of host memory: {0}")]
    OutOfHostMemory(String),

    // --- Integrity errors ---
    /// WAL record failed its CRC or ran past end of file.
    #[error("WAL corruption at offset {offset} in segment {segment}: {detail}")]
    WalCorruption {
        /// Segment sequence number
        segment: u64,
        /// Byte offset of the offending record
        offset: u64,
        /// Human-readable cause
        detail: String,
    },

    /// Backup manifest or file checksum mismatch.
    #[error("backup corruption: {0}")]
    BackupCorruption(String),

    /// Storage-level invariant violated.
    #[error("storage corruption: {0}")]
    StorageCorruption(String),

    // --- Protocol errors ---
    /// Message carried a view number older than ours.
    #[error("stale view: message view {message_view}, local view {local_view}")]
    StaleView {
        /// View number on the incoming message
        message_view: u64,
        /// View number the replica is in
        local_view: u64,
    },

    /// Operation already applied for this (client, request) pair.
    #[error("duplicate operation from client {client_id} request {request_number}")]
    DuplicateOp {
        /// Originating client id
        client_id: u64,
        /// Client-assigned request number
        request_number: u64,
    },

    /// Message from a node not in the replica set.
    #[error("unknown peer: node {0}")]
    UnknownPeer(u64),

    /// Replica role transition not in the allowed set.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Role before the attempted transition
        from: String,
        /// Role the transition targeted
        to: String,
    },

    // --- Infrastructure ---
    /// I/O error from the filesystem layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation attempted against a transaction in the wrong state.
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether a caller may retry the failed operation as-is.
    ///
    /// True exactly for the concurrency error class: write conflicts,
    /// serialization failures, timeouts, and requests that raced a view
    /// change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WriteConflict { .. }
                | Error::SerializationFailure(_)
                | Error::Timeout(_)
                | Error::NotPrimary { .. }
        )
    }

    /// Whether this error is fatal to the unit it occurred in.
    ///
    /// Integrity errors are logged and surfaced to operators; they must
    /// never be silently swallowed.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::WalCorruption { .. } | Error::BackupCorruption(_) | Error::StorageCorruption(_)
        )
    }
}
