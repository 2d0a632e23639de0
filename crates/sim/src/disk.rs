//! Virtual disk.
//!
//! An in-memory file map with sampled operation latency and injected
//! faults: writes can fail outright, reads can return corrupted bytes.
//! Callers receive the sampled latency alongside the result and account
//! for it on the scheduler, which keeps the disk independent of any
//! particular event type.

use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::io;

/// Disk behavior knobs.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub min_latency: u64,
    pub max_latency: u64,
    /// Probability a write returns an I/O error without applying
    pub write_error_probability: f64,
    /// Probability a read flips one bit of the returned data
    pub read_corruption_probability: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        DiskConfig {
            min_latency: 1,
            max_latency: 5,
            write_error_probability: 0.0,
            read_corruption_probability: 0.0,
        }
    }
}

/// One node's simulated disk.
pub struct SimDisk {
    config: DiskConfig,
    files: FxHashMap<String, Vec<u8>>,
}

impl SimDisk {
    pub fn new(config: DiskConfig) -> Self {
        SimDisk {
            config,
            files: FxHashMap::default(),
        }
    }

    fn latency(&self, rng: &mut StdRng) -> u64 {
        let (lo, hi) = (self.config.min_latency, self.config.max_latency);
        if hi <= lo {
            lo
        } else {
            rng.gen_range(lo..=hi)
        }
    }

    /// Append to a file, returning the sampled latency.
    pub fn append(
        &mut self,
        rng: &mut StdRng,
        path: &str,
        bytes: &[u8],
    ) -> (u64, io::Result<()>) {
        let latency = self.latency(rng);
        if self.config.write_error_probability > 0.0
            && rng.gen_bool(self.config.write_error_probability)
        {
            return (
                latency,
                Err(io::Error::new(io::ErrorKind::Other, "injected write error")),
            );
        }
        self.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(bytes);
        (latency, Ok(()))
    }

    /// Read a whole file, possibly corrupting the returned copy.
    pub fn read(&self, rng: &mut StdRng, path: &str) -> (u64, io::Result<Vec<u8>>) {
        let latency = self.latency(rng);
        let Some(data) = self.files.get(path) else {
            return (
                latency,
                Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
            );
        };
        let mut copy = data.clone();
        if !copy.is_empty()
            && self.config.read_corruption_probability > 0.0
            && rng.gen_bool(self.config.read_corruption_probability)
        {
            let byte = rng.gen_range(0..copy.len());
            let bit = rng.gen_range(0..8);
            copy[byte] ^= 1 << bit;
        }
        (latency, Ok(copy))
    }

    /// Truncate a file to `len` bytes (crash-tear simulation).
    pub fn truncate(&mut self, path: &str, len: usize) {
        if let Some(data) = self.files.get_mut(path) {
            data.truncate(len);
        }
    }

    /// Raw file contents, bypassing fault injection (test assertions).
    pub fn raw(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|v| v.as_slice())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}
