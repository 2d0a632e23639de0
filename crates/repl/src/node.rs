//! The VR replica.
//!
//! `VrNode` is deterministic and I/O-free: `handle_message` and `tick`
//! consume an input plus the current (node-local) time and return the
//! messages to send. All clock and network access stays outside, in the
//! harness or a production transport.
//!
//! # Normal operation
//!
//! The primary sequences a client request as `op_number + 1`, appends it
//! to its log, and broadcasts `Prepare`. Backups append in strict
//! op-number order and answer `PrepareOk`. Once a quorum (counting the
//! primary itself) has acknowledged, the primary commits, applies, and
//! replies to the client; `commit_number` piggybacks on later traffic.
//!
//! # View change
//!
//! A backup that misses heartbeats past the timeout increments the view
//! and broadcasts `StartViewChange`. Nodes adopt higher views and echo.
//! At a quorum of `StartViewChange`, each participant sends
//! `DoViewChange` (carrying its log) to the new view's deterministic
//! primary, which installs the best log it collects from a quorum and
//! announces `StartView`.
//!
//! # State transfer
//!
//! A lagging or restarted replica sends `GetState`; the peer answers
//! `NewState` with the missing log suffix, plus a full state snapshot
//! when the requester starts from op 0 (recovery).

use crate::message::{
    KvOp, LogEntry, Message, Outbound, ReplyStatus, Request,
};
use crate::quorum;
use crate::state::Role;
use basalt_core::types::NodeId;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// Protocol timing knobs, in node-local time units.
#[derive(Debug, Clone)]
pub struct VrConfig {
    pub heartbeat_interval: u64,
    pub heartbeat_timeout: u64,
    /// Bound on the client dedup table
    pub client_table_capacity: usize,
}

impl Default for VrConfig {
    fn default() -> Self {
        VrConfig {
            heartbeat_interval: 10,
            heartbeat_timeout: 50,
            client_table_capacity: 1024,
        }
    }
}

/// View number carried by a protocol message, if any.
fn message_view(msg: &Message) -> Option<u64> {
    match msg {
        Message::Request(_) | Message::Reply { .. } => None,
        Message::Prepare { view, .. }
        | Message::PrepareOk { view, .. }
        | Message::Commit { view, .. }
        | Message::StartViewChange { view }
        | Message::DoViewChange { view, .. }
        | Message::StartView { view, .. }
        | Message::GetState { view, .. }
        | Message::NewState { view, .. }
        | Message::Heartbeat { view, .. } => Some(*view),
    }
}

/// Cached outcome of a client's latest request.
#[derive(Debug, Clone)]
struct ClientEntry {
    request_number: u64,
    /// None while the request is still in flight
    reply: Option<ReplyStatus>,
}

/// One replica.
pub struct VrNode {
    node_id: NodeId,
    /// Every replica id, sorted; includes this node
    members: Vec<NodeId>,
    role: Role,
    view_number: u64,
    op_number: u64,
    commit_number: u64,
    log: Vec<LogEntry>,
    /// Applied key-value state
    state: BTreeMap<Vec<u8>, Vec<u8>>,
    config: VrConfig,

    // Normal-operation bookkeeping (primary)
    prepare_acks: FxHashMap<u64, FxHashSet<NodeId>>,
    client_table: FxHashMap<u64, ClientEntry>,
    client_order: VecDeque<u64>,

    // View-change bookkeeping
    view_change_acks: FxHashMap<u64, FxHashSet<NodeId>>,
    do_view_change: FxHashMap<u64, FxHashMap<NodeId, (Vec<LogEntry>, u64, u64)>>,
    sent_do_view_change_for: Option<u64>,

    // Liveness
    last_heard_from_primary: u64,
    last_heartbeat_sent: u64,
}

impl VrNode {
    /// A fresh member of a group. The lowest id is primary in view 1.
    pub fn new(node_id: NodeId, mut members: Vec<NodeId>, config: VrConfig) -> Self {
        members.sort_unstable();
        assert!(members.contains(&node_id), "node must be a group member");
        let role = if Self::primary_of_view(&members, 1) == node_id {
            Role::Primary
        } else {
            Role::Backup
        };
        VrNode {
            node_id,
            members,
            role,
            view_number: 1,
            op_number: 0,
            commit_number: 0,
            log: Vec::new(),
            state: BTreeMap::new(),
            config,
            prepare_acks: FxHashMap::default(),
            client_table: FxHashMap::default(),
            client_order: VecDeque::new(),
            view_change_acks: FxHashMap::default(),
            do_view_change: FxHashMap::default(),
            sent_do_view_change_for: None,
            last_heard_from_primary: 0,
            last_heartbeat_sent: 0,
        }
    }

    /// A restarted replica: empty log and state, RECOVERING role.
    /// `begin_recovery` kicks off state transfer.
    pub fn restarted(node_id: NodeId, members: Vec<NodeId>, config: VrConfig) -> Self {
        let mut node = Self::new(node_id, members, config);
        node.role = Role::Recovering;
        node
    }

    /// Ask any peer for the full state.
    pub fn begin_recovery(&self) -> Vec<Outbound> {
        self.members
            .iter()
            .filter(|&&m| m != self.node_id)
            .take(1)
            .map(|&peer| {
                Outbound::to_node(
                    peer,
                    Message::GetState {
                        view: self.view_number,
                        op_number: 0,
                    },
                )
            })
            .collect()
    }

    fn primary_of_view(members: &[NodeId], view: u64) -> NodeId {
        let idx = ((view - 1) as usize) % members.len();
        members[idx]
    }

    /// The deterministic primary of `view`.
    pub fn primary_of(&self, view: u64) -> NodeId {
        Self::primary_of_view(&self.members, view)
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn view_number(&self) -> u64 {
        self.view_number
    }

    pub fn op_number(&self) -> u64 {
        self.op_number
    }

    pub fn commit_number(&self) -> u64 {
        self.commit_number
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Applied state lookup (test observation point).
    pub fn state_get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.state.get(key)
    }

    fn quorum(&self) -> usize {
        quorum(self.members.len())
    }

    // === Timers ===

    /// Advance liveness timers. The primary emits heartbeats; a backup
    /// that has heard nothing for too long starts a view change.
    pub fn tick(&mut self, now: u64) -> Vec<Outbound> {
        match self.role {
            Role::Primary => {
                if now.saturating_sub(self.last_heartbeat_sent) >= self.config.heartbeat_interval {
                    self.last_heartbeat_sent = now;
                    return vec![Outbound::broadcast(Message::Heartbeat {
                        view: self.view_number,
                        ts: now,
                    })];
                }
                Vec::new()
            }
            Role::Backup => {
                if now.saturating_sub(self.last_heard_from_primary)
                    > self.config.heartbeat_timeout
                {
                    self.start_view_change(self.view_number + 1, now)
                } else {
                    Vec::new()
                }
            }
            // Recovering nodes wait for state transfer; view-change
            // participants wait for StartView.
            Role::Recovering | Role::ViewChange => Vec::new(),
        }
    }

    // === Message dispatch ===

    pub fn handle_message(&mut self, from: NodeId, msg: Message, now: u64) -> Vec<Outbound> {
        // A primary that sees a higher view was deposed while isolated.
        // The only legal exit is through VIEW_CHANGE; it adopts the view
        // and catches up from the new primary via state transfer.
        if self.role == Role::Primary {
            if let Some(view) = message_view(&msg) {
                if view > self.view_number {
                    if self.role.transition(Role::ViewChange).is_err() {
                        return Vec::new();
                    }
                    self.view_number = view;
                    tracing::info!(node = self.node_id, view, "deposed; requesting state");
                    return vec![Outbound::to_node(
                        self.primary_of(view),
                        Message::GetState {
                            view,
                            op_number: self.commit_number,
                        },
                    )];
                }
            }
        }
        match msg {
            Message::Request(req) => self.on_request(req, now),
            Message::Prepare {
                view,
                op_number,
                commit_number,
                entry,
            } => self.on_prepare(from, view, op_number, commit_number, entry, now),
            Message::PrepareOk { view, op_number } => self.on_prepare_ok(from, view, op_number),
            Message::Commit {
                view,
                commit_number,
            } => self.on_commit(view, commit_number, now),
            Message::StartViewChange { view } => self.on_start_view_change(from, view, now),
            Message::DoViewChange {
                view,
                log,
                op_number,
                commit_number,
            } => self.on_do_view_change(from, view, log, op_number, commit_number, now),
            Message::StartView {
                view,
                log,
                op_number,
                commit_number,
            } => self.on_start_view(view, log, op_number, commit_number, now),
            Message::GetState { view, op_number } => self.on_get_state(from, view, op_number),
            Message::NewState {
                view,
                log_suffix,
                state,
                op_number,
                commit_number,
            } => self.on_new_state(view, log_suffix, state, op_number, commit_number, now),
            Message::Heartbeat { view, .. } => {
                if view >= self.view_number && self.role == Role::Backup {
                    self.view_number = view;
                    self.last_heard_from_primary = now;
                } else if view >= self.view_number && self.role == Role::ViewChange {
                    // The election concluded without us (partitioned
                    // initiator); catch up from the winner.
                    self.view_number = view;
                    return vec![Outbound::to_node(
                        self.primary_of(view),
                        Message::GetState {
                            view,
                            op_number: self.commit_number,
                        },
                    )];
                }
                Vec::new()
            }
            Message::Reply { .. } => Vec::new(),
        }
    }

    // === Normal operation ===

    fn on_request(&mut self, req: Request, _now: u64) -> Vec<Outbound> {
        if self.role != Role::Primary {
            return vec![Outbound::to_client(
                req.client_id,
                Message::Reply {
                    client_id: req.client_id,
                    request_number: req.request_number,
                    status: ReplyStatus::NotPrimary {
                        view: self.view_number,
                    },
                },
            )];
        }

        // At-most-once: drop stale requests, resend the cached reply for
        // the current one.
        if let Some(entry) = self.client_table.get(&req.client_id) {
            if req.request_number < entry.request_number {
                return Vec::new();
            }
            if req.request_number == entry.request_number {
                return match &entry.reply {
                    Some(status) => vec![Outbound::to_client(
                        req.client_id,
                        Message::Reply {
                            client_id: req.client_id,
                            request_number: req.request_number,
                            status: status.clone(),
                        },
                    )],
                    // Still in flight; the commit will answer.
                    None => Vec::new(),
                };
            }
        }

        self.op_number += 1;
        let entry = LogEntry {
            op_number: self.op_number,
            view: self.view_number,
            client_id: req.client_id,
            request_number: req.request_number,
            op: req.op,
        };
        self.log.push(entry.clone());
        self.client_table_insert(
            req.client_id,
            ClientEntry {
                request_number: req.request_number,
                reply: None,
            },
        );
        self.prepare_acks
            .entry(self.op_number)
            .or_default()
            .insert(self.node_id);

        let mut out = vec![Outbound::broadcast(Message::Prepare {
            view: self.view_number,
            op_number: self.op_number,
            commit_number: self.commit_number,
            entry,
        })];
        // A single-replica group commits immediately.
        out.extend(self.try_commit(self.op_number));
        out
    }

    fn on_prepare(
        &mut self,
        from: NodeId,
        view: u64,
        op_number: u64,
        commit_number: u64,
        entry: LogEntry,
        now: u64,
    ) -> Vec<Outbound> {
        if view < self.view_number {
            tracing::debug!(node = self.node_id, view, local = self.view_number, "stale prepare");
            return Vec::new();
        }
        if self.role != Role::Backup {
            return Vec::new();
        }
        if view > self.view_number {
            // Joining a newer view: anything uncommitted from the old
            // view may not have survived the election.
            self.truncate_uncommitted_tail();
        }
        self.view_number = view;
        self.last_heard_from_primary = now;

        if op_number == self.op_number + 1 {
            self.op_number = op_number;
            self.log.push(entry);
            self.apply_through(commit_number);
            vec![Outbound::to_node(
                from,
                Message::PrepareOk {
                    view: self.view_number,
                    op_number,
                },
            )]
        } else if op_number <= self.op_number {
            // Duplicate delivery; ack idempotently.
            self.apply_through(commit_number);
            vec![Outbound::to_node(
                from,
                Message::PrepareOk {
                    view: self.view_number,
                    op_number,
                },
            )]
        } else {
            // Gap: fetch the missing ops before acking anything.
            vec![Outbound::to_node(
                from,
                Message::GetState {
                    view: self.view_number,
                    op_number: self.op_number,
                },
            )]
        }
    }

    fn on_prepare_ok(&mut self, from: NodeId, view: u64, op_number: u64) -> Vec<Outbound> {
        if view != self.view_number || self.role != Role::Primary {
            return Vec::new();
        }
        self.prepare_acks.entry(op_number).or_default().insert(from);
        self.try_commit(op_number)
    }

    /// Commit `op_number` (and everything before it) once a quorum has
    /// acknowledged, apply, and answer the waiting clients.
    fn try_commit(&mut self, op_number: u64) -> Vec<Outbound> {
        if op_number <= self.commit_number {
            return Vec::new();
        }
        let acks = self
            .prepare_acks
            .get(&op_number)
            .map(|s| s.len())
            .unwrap_or(0);
        if acks < self.quorum() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let newly_committed = self.apply_through(op_number);
        for (client_id, request_number, status) in newly_committed {
            self.client_table_insert(
                client_id,
                ClientEntry {
                    request_number,
                    reply: Some(status.clone()),
                },
            );
            out.push(Outbound::to_client(
                client_id,
                Message::Reply {
                    client_id,
                    request_number,
                    status,
                },
            ));
        }
        out.push(Outbound::broadcast(Message::Commit {
            view: self.view_number,
            commit_number: self.commit_number,
        }));
        out
    }

    fn on_commit(&mut self, view: u64, commit_number: u64, now: u64) -> Vec<Outbound> {
        if view < self.view_number || self.role != Role::Backup {
            return Vec::new();
        }
        self.view_number = view;
        self.last_heard_from_primary = now;
        self.apply_through(commit_number);
        Vec::new()
    }

    /// Apply committed entries in strict op order up to `target`.
    /// Returns `(client, request, reply)` for each newly applied entry.
    fn apply_through(&mut self, target: u64) -> Vec<(u64, u64, ReplyStatus)> {
        let target = target.min(self.op_number);
        let mut replies = Vec::new();
        while self.commit_number < target {
            let next = self.commit_number + 1;
            let entry = self.log[(next - 1) as usize].clone();
            debug_assert_eq!(entry.op_number, next, "log indexed by op number");
            let value = match &entry.op {
                KvOp::Put { key, value } => {
                    self.state.insert(key.clone(), value.clone());
                    None
                }
                KvOp::Delete { key } => {
                    self.state.remove(key);
                    None
                }
                KvOp::Get { key } => self.state.get(key).cloned(),
            };
            self.commit_number = next;
            replies.push((
                entry.client_id,
                entry.request_number,
                ReplyStatus::Ok { value },
            ));
        }
        replies
    }

    // === View change ===

    fn start_view_change(&mut self, new_view: u64, _now: u64) -> Vec<Outbound> {
        if new_view <= self.view_number && self.role == Role::ViewChange {
            return Vec::new();
        }
        if self.role.transition(Role::ViewChange).is_err() {
            return Vec::new();
        }
        self.view_number = new_view;
        self.view_change_acks
            .entry(new_view)
            .or_default()
            .insert(self.node_id);
        tracing::info!(node = self.node_id, view = new_view, "starting view change");
        vec![Outbound::broadcast(Message::StartViewChange { view: new_view })]
    }

    fn on_start_view_change(&mut self, from: NodeId, view: u64, now: u64) -> Vec<Outbound> {
        // A recovering node has no log worth electing; it waits out the
        // view change and catches up afterwards.
        if view < self.view_number || self.role == Role::Recovering {
            return Vec::new();
        }
        let mut out = Vec::new();
        if view > self.view_number || self.role != Role::ViewChange {
            out.extend(self.start_view_change(view, now));
        }
        self.view_change_acks.entry(view).or_default().insert(from);

        let acks = self.view_change_acks.get(&view).map(|s| s.len()).unwrap_or(0);
        if acks >= self.quorum() && self.sent_do_view_change_for != Some(view) {
            self.sent_do_view_change_for = Some(view);
            let new_primary = self.primary_of(view);
            let dvc = Message::DoViewChange {
                view,
                log: self.log.clone(),
                op_number: self.op_number,
                commit_number: self.commit_number,
            };
            if new_primary == self.node_id {
                // Deliver to ourselves directly.
                out.extend(self.on_do_view_change(
                    self.node_id,
                    view,
                    self.log.clone(),
                    self.op_number,
                    self.commit_number,
                    now,
                ));
            } else {
                out.push(Outbound::to_node(new_primary, dvc));
            }
        }
        out
    }

    fn on_do_view_change(
        &mut self,
        from: NodeId,
        view: u64,
        log: Vec<LogEntry>,
        op_number: u64,
        commit_number: u64,
        now: u64,
    ) -> Vec<Outbound> {
        if view < self.view_number || self.primary_of(view) != self.node_id {
            return Vec::new();
        }
        self.do_view_change
            .entry(view)
            .or_default()
            .insert(from, (log, op_number, commit_number));

        let received = self.do_view_change.get(&view).map(|m| m.len()).unwrap_or(0);
        if received < self.quorum() || self.role == Role::Primary {
            return Vec::new();
        }

        // Select the log with the largest (view of last entry, op count).
        let msgs = self.do_view_change.remove(&view).expect("checked present");
        let mut best: Option<(u64, u64, Vec<LogEntry>)> = None;
        let mut max_commit = 0;
        for (_, (log, op_number, commit_number)) in msgs {
            let last_view = log.last().map(|e| e.view).unwrap_or(0);
            max_commit = max_commit.max(commit_number);
            let better = match &best {
                None => true,
                Some((bv, bo, _)) => (last_view, op_number) > (*bv, *bo),
            };
            if better {
                best = Some((last_view, op_number, log));
            }
        }
        let (_, op_number, log) = best.expect("quorum is non-empty");

        if self.role.transition(Role::Primary).is_err() {
            return Vec::new();
        }
        self.view_number = view;
        self.log = log;
        self.op_number = op_number;
        self.apply_missing_prefix(max_commit);
        self.prepare_acks.clear();
        self.last_heartbeat_sent = now;
        tracing::info!(node = self.node_id, view, op_number, "became primary");

        vec![
            Outbound::broadcast(Message::StartView {
                view,
                log: self.log.clone(),
                op_number: self.op_number,
                commit_number: self.commit_number,
            }),
            Outbound::broadcast(Message::Heartbeat { view, ts: now }),
        ]
    }

    fn on_start_view(
        &mut self,
        view: u64,
        log: Vec<LogEntry>,
        op_number: u64,
        commit_number: u64,
        now: u64,
    ) -> Vec<Outbound> {
        if view < self.view_number {
            return Vec::new();
        }
        let target_role = if self.primary_of(view) == self.node_id {
            Role::Primary
        } else {
            Role::Backup
        };
        if self.role.transition(target_role).is_err() {
            return Vec::new();
        }
        self.view_number = view;
        // Install the announced log; anything uncommitted beyond it is
        // truncated by replacement.
        self.log = log;
        self.op_number = op_number;
        self.apply_missing_prefix(commit_number);
        self.last_heard_from_primary = now;
        self.sent_do_view_change_for = None;
        Vec::new()
    }

    /// Rebuild applied state for a log installed from elsewhere: replay
    /// the committed prefix from scratch if our commit cursor points at
    /// entries we no longer have confidence in.
    fn apply_missing_prefix(&mut self, commit_number: u64) {
        // Installed logs can differ from what we had; rebuild state from
        // the beginning to keep application strictly in op order.
        self.state.clear();
        self.commit_number = 0;
        self.apply_through(commit_number.min(self.op_number));
    }

    // === State transfer ===

    fn on_get_state(&mut self, from: NodeId, _view: u64, op_number: u64) -> Vec<Outbound> {
        if self.role == Role::Recovering {
            return Vec::new();
        }
        let suffix: Vec<LogEntry> = self
            .log
            .iter()
            .filter(|e| e.op_number > op_number)
            .cloned()
            .collect();
        // A requester starting from op 0 is rebuilding from nothing;
        // include the applied snapshot so it need not replay history it
        // cannot have.
        let state = if op_number == 0 {
            Some(
                self.state
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        } else {
            None
        };
        vec![Outbound::to_node(
            from,
            Message::NewState {
                view: self.view_number,
                log_suffix: suffix,
                state,
                op_number: self.op_number,
                commit_number: self.commit_number,
            },
        )]
    }

    fn on_new_state(
        &mut self,
        view: u64,
        log_suffix: Vec<LogEntry>,
        state: Option<Vec<(Vec<u8>, Vec<u8>)>>,
        op_number: u64,
        commit_number: u64,
        now: u64,
    ) -> Vec<Outbound> {
        if view < self.view_number {
            return Vec::new();
        }
        self.view_number = view;

        if self.role == Role::Recovering {
            // Full rebuild: snapshot plus entire log.
            self.state.clear();
            if let Some(snapshot) = state {
                for (k, v) in snapshot {
                    self.state.insert(k, v);
                }
            }
            self.log = log_suffix;
            self.op_number = op_number;
            // The snapshot already reflects the committed prefix.
            self.commit_number = commit_number;
            let target_role = if self.primary_of(view) == self.node_id {
                Role::Primary
            } else {
                Role::Backup
            };
            if self.role.transition(target_role).is_err() {
                return Vec::new();
            }
            self.last_heard_from_primary = now;
            tracing::info!(node = self.node_id, view, op_number, "recovery complete");
            return Vec::new();
        }

        // A view-change participant that requested state discards its
        // uncommitted tail before splicing the authoritative suffix.
        if self.role == Role::ViewChange {
            self.truncate_uncommitted_tail();
        }

        // Splice the suffix past what we have.
        for entry in log_suffix {
            if entry.op_number == self.op_number + 1 {
                self.op_number = entry.op_number;
                self.log.push(entry);
            }
        }
        self.apply_through(commit_number);
        self.last_heard_from_primary = now;

        if self.role == Role::ViewChange {
            let target_role = if self.primary_of(view) == self.node_id {
                Role::Primary
            } else {
                Role::Backup
            };
            if self.role.transition(target_role).is_err() {
                return Vec::new();
            }
            self.sent_do_view_change_for = None;
            tracing::info!(node = self.node_id, view, "rejoined after view change");
        }
        Vec::new()
    }

    /// Drop log entries past the commit point; they belong to a view
    /// that may have elected a primary without them.
    fn truncate_uncommitted_tail(&mut self) {
        self.log.truncate(self.commit_number as usize);
        self.op_number = self.commit_number;
    }

    fn client_table_insert(&mut self, client_id: u64, entry: ClientEntry) {
        if !self.client_table.contains_key(&client_id) {
            self.client_order.push_back(client_id);
            // LRU-bounded: shed the oldest client when over capacity.
            while self.client_order.len() > self.config.client_table_capacity {
                if let Some(evicted) = self.client_order.pop_front() {
                    self.client_table.remove(&evicted);
                }
            }
        }
        self.client_table.insert(client_id, entry);
    }
}
