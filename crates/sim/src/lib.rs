//! Deterministic simulation harness.
//!
//! A seeded scheduler owns global virtual time; components under test
//! receive their clock, disk, and network through it, so a scenario
//! replays byte-identically from its seed. Events are a sum type
//! (`Event<M>`): message deliveries, timers, and disk completions all
//! collapse to "deliver this outcome to that node".
//!
//! The scheduler pops the earliest task; ties on virtual time break by
//! insertion sequence. Scheduled tasks can be cancelled. `run_until`
//! drives a scenario for a bounded virtual duration or until the queue
//! drains.

pub mod clock;
pub mod disk;
pub mod network;
pub mod scheduler;

pub use clock::NodeClock;
pub use disk::SimDisk;
pub use network::{NetworkConfig, SimNetwork};
pub use scheduler::{Event, Scheduler, TaskId};

/// Read the scenario seed from the environment, defaulting to 0.
pub fn seed_from_env() -> u64 {
    std::env::var("BASALT_SIM_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
