//! VR protocol messages and log entries.

use basalt_core::types::NodeId;
use serde::{Deserialize, Serialize};

/// One state-machine operation: linearizable key-value semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Get { key: Vec<u8> },
}

/// A client request, identified for at-most-once execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub client_id: u64,
    /// Client-assigned, monotonically increasing per client
    pub request_number: u64,
    pub op: KvOp,
}

/// One replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub op_number: u64,
    /// View in which the entry was appended
    pub view: u64,
    pub client_id: u64,
    pub request_number: u64,
    pub op: KvOp,
}

/// Outcome field of a client reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    /// Operation applied; `value` holds a Get result
    Ok { value: Option<Vec<u8>> },
    /// Resend to the primary of the carried view
    NotPrimary { view: u64 },
}

/// The protocol message set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Prepare {
        view: u64,
        op_number: u64,
        commit_number: u64,
        entry: LogEntry,
    },
    PrepareOk {
        view: u64,
        op_number: u64,
    },
    Commit {
        view: u64,
        commit_number: u64,
    },
    StartViewChange {
        view: u64,
    },
    DoViewChange {
        view: u64,
        log: Vec<LogEntry>,
        op_number: u64,
        commit_number: u64,
    },
    StartView {
        view: u64,
        log: Vec<LogEntry>,
        op_number: u64,
        commit_number: u64,
    },
    GetState {
        view: u64,
        op_number: u64,
    },
    NewState {
        view: u64,
        log_suffix: Vec<LogEntry>,
        /// Applied state snapshot, included for recovering requesters
        state: Option<Vec<(Vec<u8>, Vec<u8>)>>,
        op_number: u64,
        commit_number: u64,
    },
    Heartbeat {
        view: u64,
        ts: u64,
    },
    Reply {
        client_id: u64,
        request_number: u64,
        status: ReplyStatus,
    },
}

/// Where an outbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    /// Every peer except the sender
    AllPeers,
    Client(u64),
}

/// An outbound message with its destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub msg: Message,
}

impl Outbound {
    pub fn to_node(node: NodeId, msg: Message) -> Self {
        Outbound {
            target: Target::Node(node),
            msg,
        }
    }

    pub fn broadcast(msg: Message) -> Self {
        Outbound {
            target: Target::AllPeers,
            msg,
        }
    }

    pub fn to_client(client: u64, msg: Message) -> Self {
        Outbound {
            target: Target::Client(client),
            msg,
        }
    }
}
