//! Physical plan execution.
//!
//! Operators exchange columnar batches (`ResultSet`). Each operator kind
//! has a kernel with a uniform contract (typed column buffers in, one or
//! more buffers plus a produced-count out) and the CPU and accelerator
//! implementations are interchangeable behind it: the planner's
//! `use_accelerator` annotation picks the path per node, and an
//! accelerator allocation failure falls back to the CPU kernel for that
//! node alone.
//!
//! Rows come from a `TableProvider` (implemented by the engine over the
//! MVCC layer), so every query reads through its transaction's snapshot.

pub mod accel;
pub mod exec;
pub mod kernels;
pub mod provider;

pub use accel::{AcceleratorRuntime, DeviceBufferCache, HostVectorRuntime};
pub use exec::Executor;
pub use provider::{RangeBound, TableProvider};
