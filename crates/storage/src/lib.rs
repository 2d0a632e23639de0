//! In-memory implementation of the storage adapter.
//!
//! `MemStore` is an ordered byte-key map behind a `RwLock`, with cloned
//! snapshots for consistent reads. It implements the `KvStore` contract
//! from `basalt-core`; the rest of the engine never names the concrete
//! type.

mod mem;
mod snapshot;

pub use mem::MemStore;
pub use snapshot::ClonedSnapshot;
