//! Engine configuration.
//!
//! Loaded from a TOML file or built programmatically. The listen port is
//! recorded for the (external) server layer; the engine itself never
//! binds it.

use basalt_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data directory holding the WAL and lock file
    pub data_dir: PathBuf,
    /// TCP port recorded for the server layer
    pub listen_port: u16,
    /// fsync on every append instead of commit-only
    pub sync_every_write: bool,
    /// WAL segment rotation threshold, bytes
    pub wal_segment_size: u64,
    /// Checkpoint after this many committed transactions
    pub checkpoint_interval_ops: u64,
    /// Background checkpointer period, milliseconds
    pub checkpoint_interval_ms: u64,
    /// Minimum estimated rows before accelerator off-load is considered
    pub min_rows_for_offload: u64,
    /// Off-load every eligible operator when an accelerator is attached
    pub force_accelerator: bool,
    /// Attach the accelerator runtime
    pub accelerator_enabled: bool,
    /// Cardinality threshold for hash-join selection
    pub hash_join_threshold: u64,
    /// Upper bound on per-operator parallelism
    pub max_parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("./basalt-data"),
            listen_port: 5433,
            sync_every_write: false,
            wal_segment_size: 64 * 1024 * 1024,
            checkpoint_interval_ops: 10_000,
            checkpoint_interval_ms: 30_000,
            min_rows_for_offload: 10_000,
            force_accelerator: false,
            accelerator_enabled: false,
            hash_join_threshold: 1_000,
            max_parallelism: 8,
        }
    }
}

impl EngineConfig {
    /// Config rooted at a specific directory, other settings default.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_dir: data_dir.into(),
            ..EngineConfig::default()
        }
    }

    /// Parse from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Serialization(format!("config: {e}")))
    }

    /// Write the full config (defaults included) to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("config: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// WAL directory under the data dir.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Lock file guarding exclusive access to the data dir.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("LOCK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("basalt.toml");
        let mut config = EngineConfig::at("/srv/basalt");
        config.listen_port = 9999;
        config.force_accelerator = true;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.listen_port, 9999);
        assert!(loaded.force_accelerator);
        assert_eq!(loaded.data_dir, PathBuf::from("/srv/basalt"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("basalt.toml");
        std::fs::write(&path, "listen_port = 1234\n").unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.listen_port, 1234);
        assert_eq!(loaded.max_parallelism, 8);
    }

    #[test]
    fn test_derived_paths() {
        let config = EngineConfig::at("/data");
        assert_eq!(config.wal_dir(), PathBuf::from("/data/wal"));
        assert_eq!(config.lock_path(), PathBuf::from("/data/LOCK"));
    }
}
