//! Accelerator abstraction.
//!
//! The engine never talks to a device directly: the planner flags nodes
//! with `use_accelerator`, and the executor stages their input buffers
//! through a refcounted `DeviceBufferCache` before running the kernel.
//! `AcceleratorRuntime` describes the device; `HostVectorRuntime` is the
//! reference implementation whose "device memory" is host memory, which
//! keeps the staging, cache, and fallback machinery honest while
//! satisfying every engine property CPU-only.
//!
//! Allocation failure surfaces as `OutOfAcceleratorMemory`; the executor
//! catches it and falls back to the CPU path for that node.

use basalt_core::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A pluggable accelerator device.
pub trait AcceleratorRuntime: Send + Sync {
    /// Human-readable device name, for logs.
    fn name(&self) -> &str;

    /// Device memory available for staged buffers, in bytes.
    fn memory_budget(&self) -> usize;
}

/// Reference runtime backed by host memory.
pub struct HostVectorRuntime {
    budget: usize,
}

impl HostVectorRuntime {
    pub fn new(budget: usize) -> Self {
        HostVectorRuntime { budget }
    }
}

impl Default for HostVectorRuntime {
    fn default() -> Self {
        // 256 MiB of simulated device memory.
        HostVectorRuntime::new(256 * 1024 * 1024)
    }
}

impl AcceleratorRuntime for HostVectorRuntime {
    fn name(&self) -> &str {
        "host-vector"
    }

    fn memory_budget(&self) -> usize {
        self.budget
    }
}

struct CacheEntry {
    bytes: Arc<Vec<u8>>,
    refs: usize,
    last_tick: u64,
}

/// Refcounted device-buffer cache keyed by logical buffer identity.
///
/// A pinned buffer is never evicted. Unpinned buffers stay cached and are
/// reclaimed oldest-first when an upload needs room, or wholesale by an
/// explicit age pass.
pub struct DeviceBufferCache {
    budget: usize,
    used: AtomicUsize,
    entries: DashMap<u64, CacheEntry>,
    tick: AtomicU64,
}

impl DeviceBufferCache {
    pub fn new(budget: usize) -> Self {
        DeviceBufferCache {
            budget,
            used: AtomicUsize::new(0),
            entries: DashMap::new(),
            tick: AtomicU64::new(0),
        }
    }

    /// Pin the buffer with logical identity `id`, uploading via `load` on
    /// a miss. The caller must `unpin` when the kernel finishes.
    pub fn pin(&self, id: u64, load: impl FnOnce() -> Vec<u8>) -> Result<Arc<Vec<u8>>> {
        let now = self.tick.fetch_add(1, Ordering::SeqCst);
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.refs += 1;
            entry.last_tick = now;
            return Ok(Arc::clone(&entry.bytes));
        }

        let bytes = load();
        let size = bytes.len();
        if size > self.budget {
            return Err(Error::OutOfAcceleratorMemory { requested: size });
        }
        if self.used.load(Ordering::SeqCst) + size > self.budget {
            self.evict_for(size)?;
        }
        let arc = Arc::new(bytes);
        self.used.fetch_add(size, Ordering::SeqCst);
        self.entries.insert(
            id,
            CacheEntry {
                bytes: Arc::clone(&arc),
                refs: 1,
                last_tick: now,
            },
        );
        Ok(arc)
    }

    /// Drop one reference. The buffer stays cached for reuse.
    pub fn unpin(&self, id: u64) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Evict unreferenced buffers, oldest first, until `needed` bytes fit.
    fn evict_for(&self, needed: usize) -> Result<()> {
        loop {
            if self.used.load(Ordering::SeqCst) + needed <= self.budget {
                return Ok(());
            }
            let victim = self
                .entries
                .iter()
                .filter(|e| e.value().refs == 0)
                .min_by_key(|e| e.value().last_tick)
                .map(|e| *e.key());
            match victim {
                Some(id) => {
                    if let Some((_, entry)) = self.entries.remove(&id) {
                        self.used.fetch_sub(entry.bytes.len(), Ordering::SeqCst);
                    }
                }
                None => {
                    // Everything left is pinned.
                    return Err(Error::OutOfAcceleratorMemory { requested: needed });
                }
            }
        }
    }

    /// Age pass: drop every unreferenced buffer not touched in the last
    /// `max_age` pins. Returns the count evicted.
    pub fn evict_aged(&self, max_age: u64) -> usize {
        let now = self.tick.load(Ordering::SeqCst);
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.value().refs == 0 && now.saturating_sub(e.value().last_tick) > max_age)
            .map(|e| *e.key())
            .collect();
        let mut evicted = 0;
        for id in stale {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.used.fetch_sub(entry.bytes.len(), Ordering::SeqCst);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
