//! Seeded virtual-time scheduler.

use basalt_core::types::NodeId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Handle for cancelling a scheduled task.
pub type TaskId = u64;

/// The harness event sum type. `M` is the component's message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<M> {
    /// A network message arriving at `to`.
    Deliver { from: NodeId, to: NodeId, msg: M },
    /// A timer firing at `node`; `kind` disambiguates multiple timers.
    Timer { node: NodeId, kind: u32 },
    /// A disk operation completing at `node`.
    DiskDone { node: NodeId, token: u64 },
}

struct Scheduled<M> {
    at: u64,
    seq: u64,
    id: TaskId,
    event: Event<M>,
}

// Min-heap by (time, insertion sequence): BinaryHeap is a max-heap, so
// the ordering is reversed here.
impl<M> Ord for Scheduled<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}
impl<M> PartialOrd for Scheduled<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<M> PartialEq for Scheduled<M> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl<M> Eq for Scheduled<M> {}

/// Deterministic scheduler owning virtual time and the scenario RNG.
pub struct Scheduler<M> {
    now: u64,
    queue: BinaryHeap<Scheduled<M>>,
    next_seq: u64,
    next_id: TaskId,
    cancelled: FxHashSet<TaskId>,
    rng: StdRng,
}

impl<M> Scheduler<M> {
    pub fn new(seed: u64) -> Self {
        Scheduler {
            now: 0,
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_id: 1,
            cancelled: FxHashSet::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Scenario RNG; all randomness flows through here so the seed fully
    /// determines the run.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Schedule `event` `delay` time units from now.
    pub fn schedule(&mut self, delay: u64, event: Event<M>) -> TaskId {
        self.schedule_at(self.now + delay, event)
    }

    /// Schedule `event` at an absolute virtual time.
    pub fn schedule_at(&mut self, at: u64, event: Event<M>) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            at: at.max(self.now),
            seq,
            id,
            event,
        });
        id
    }

    /// Cancel a pending task. Returns false if it already fired or was
    /// already cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if id == 0 || id >= self.next_id || self.cancelled.contains(&id) {
            return false;
        }
        self.cancelled.insert(id)
    }

    /// Pop the next event at or before `deadline`, advancing virtual
    /// time to its timestamp.
    pub fn pop_next(&mut self, deadline: Option<u64>) -> Option<Event<M>> {
        loop {
            let head_at = self.queue.peek()?.at;
            if let Some(deadline) = deadline {
                if head_at > deadline {
                    return None;
                }
            }
            let task = self.queue.pop().expect("peeked");
            if self.cancelled.remove(&task.id) {
                continue;
            }
            self.now = task.at;
            return Some(task.event);
        }
    }

    /// Drive the scenario until `deadline` (or until drained when
    /// `None`), handing each event to `handler`. The handler may
    /// schedule follow-up tasks. Returns the number of events processed.
    pub fn run_until<F>(&mut self, deadline: Option<u64>, mut handler: F) -> usize
    where
        F: FnMut(&mut Scheduler<M>, Event<M>),
    {
        let mut processed = 0;
        while let Some(event) = self.pop_next(deadline) {
            handler(self, event);
            processed += 1;
        }
        if let Some(deadline) = deadline {
            // Time passes even when nothing fires.
            self.now = self.now.max(deadline);
        }
        processed
    }

    /// Pending (non-cancelled) task count.
    pub fn pending(&self) -> usize {
        self.queue.len() - self.cancelled.len().min(self.queue.len())
    }
}
