//! Deterministic cluster harness.
//!
//! Wires a group of `VrNode`s to the simulation scheduler and network:
//! message deliveries and per-node tick timers drive the protocol, and
//! every run is a pure function of the seed. Crash, restart, partition,
//! and heal are scenario controls.

use crate::message::{Message, Outbound, ReplyStatus, Request, Target};
use crate::node::{VrConfig, VrNode};
use basalt_core::types::NodeId;
use basalt_sim::{Event, NetworkConfig, Scheduler, SimNetwork};
use rustc_hash::FxHashMap;

const TICK_KIND: u32 = 0;
/// Virtual time between tick timers.
const TICK_EVERY: u64 = 5;

/// A replica group under simulation.
pub struct SimCluster {
    nodes: FxHashMap<NodeId, VrNode>,
    members: Vec<NodeId>,
    sched: Scheduler<Message>,
    net: SimNetwork,
    config: VrConfig,
    /// Client replies observed, in delivery order
    pub replies: Vec<(u64, u64, ReplyStatus)>,
}

impl SimCluster {
    /// A cluster of `n` nodes with ids `1..=n`.
    pub fn new(n: usize, seed: u64, net_config: NetworkConfig, config: VrConfig) -> Self {
        let members: Vec<NodeId> = (1..=n as u64).collect();
        let mut nodes = FxHashMap::default();
        let mut sched = Scheduler::new(seed);
        for &id in &members {
            nodes.insert(id, VrNode::new(id, members.clone(), config.clone()));
            sched.schedule(TICK_EVERY, Event::Timer {
                node: id,
                kind: TICK_KIND,
            });
        }
        SimCluster {
            nodes,
            members,
            sched,
            net: SimNetwork::new(net_config),
            config,
            replies: Vec::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> u64 {
        self.sched.now()
    }

    /// Inject a client request at a specific node.
    pub fn client_request(&mut self, node: NodeId, req: Request) {
        self.net.send(
            &mut self.sched,
            // Clients get ids above the replica range.
            1_000 + req.client_id,
            node,
            Message::Request(req),
        );
    }

    /// Send a request and run until its reply arrives or `deadline`
    /// virtual units pass. Expiry returns `Timeout` and leaves server
    /// state untouched; the operation may still commit later, in which
    /// case a retry is answered from the dedup table.
    pub fn client_request_with_deadline(
        &mut self,
        node: NodeId,
        req: Request,
        deadline: u64,
    ) -> basalt_core::error::Result<ReplyStatus> {
        let client = req.client_id;
        let number = req.request_number;
        let started = self.sched.now();
        self.client_request(node, req);
        while self.sched.now() < started + deadline {
            self.run_for((started + deadline - self.sched.now()).min(TICK_EVERY));
            if let Some((_, _, status)) = self
                .replies
                .iter()
                .find(|(c, n, _)| *c == client && *n == number)
            {
                return Ok(status.clone());
            }
        }
        Err(basalt_core::error::Error::Timeout(deadline))
    }

    /// The node currently acting as primary, if exactly one does.
    pub fn current_primary(&self) -> Option<NodeId> {
        let primaries: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.is_primary())
            .map(|n| n.node_id())
            .collect();
        match primaries.as_slice() {
            [one] => Some(*one),
            _ => None,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&VrNode> {
        self.nodes.get(&id)
    }

    /// Crash a node: it stops processing and its queued events drop on
    /// the floor.
    pub fn crash(&mut self, id: NodeId) {
        self.nodes.remove(&id);
    }

    /// Restart a crashed node in RECOVERING and kick off state transfer.
    pub fn restart(&mut self, id: NodeId) {
        let node = VrNode::restarted(id, self.members.clone(), self.config.clone());
        let outbound = node.begin_recovery();
        self.nodes.insert(id, node);
        self.route(id, outbound);
        self.sched.schedule(TICK_EVERY, Event::Timer {
            node: id,
            kind: TICK_KIND,
        });
    }

    /// Cut the network between two groups.
    pub fn partition(&mut self, side_a: &[NodeId], side_b: &[NodeId]) {
        self.net.partition(side_a, side_b);
    }

    /// Heal all partitions.
    pub fn heal(&mut self) {
        self.net.heal();
    }

    /// Run for `duration` virtual time units.
    pub fn run_for(&mut self, duration: u64) {
        let deadline = self.sched.now() + duration;
        loop {
            let Some(event) = self.sched.pop_next(Some(deadline)) else {
                break;
            };
            match event {
                Event::Deliver { from, to, msg } => {
                    let now = self.sched.now();
                    let Some(node) = self.nodes.get_mut(&to) else {
                        continue; // crashed
                    };
                    let outbound = node.handle_message(from, msg, now);
                    self.route(to, outbound);
                }
                Event::Timer { node: id, kind: _ } => {
                    let now = self.sched.now();
                    if let Some(node) = self.nodes.get_mut(&id) {
                        let outbound = node.tick(now);
                        self.route(id, outbound);
                        self.sched.schedule(TICK_EVERY, Event::Timer {
                            node: id,
                            kind: TICK_KIND,
                        });
                    }
                }
                Event::DiskDone { .. } => {}
            }
        }
    }

    fn route(&mut self, from: NodeId, outbound: Vec<Outbound>) {
        for out in outbound {
            match out.target {
                Target::Node(to) => {
                    self.net.send(&mut self.sched, from, to, out.msg);
                }
                Target::AllPeers => {
                    for &peer in &self.members {
                        if peer != from {
                            self.net
                                .send(&mut self.sched, from, peer, out.msg.clone());
                        }
                    }
                }
                Target::Client(_) => {
                    if let Message::Reply {
                        client_id,
                        request_number,
                        status,
                    } = out.msg
                    {
                        self.replies.push((client_id, request_number, status));
                    }
                }
            }
        }
    }

    /// Successful replies for a given client, in order.
    pub fn ok_replies(&self, client: u64) -> Vec<u64> {
        self.replies
            .iter()
            .filter(|(c, _, s)| *c == client && matches!(s, ReplyStatus::Ok { .. }))
            .map(|(_, n, _)| *n)
            .collect()
    }
}
