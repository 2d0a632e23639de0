//! Backups and point-in-time recovery.
//!
//! # Layout
//!
//! ```text
//! <backup dir>/
//!   manifest          JSON: id, timestamp, source LSN, file list + CRCs
//!   data/kv.dat       storage tree snapshot, length-prefixed pairs
//!   wal/wal-*.log     WAL segments from the manifest LSN forward
//! ```
//!
//! `verify_backup` re-hashes every listed file against the manifest.
//! `recover_from_backup` materializes the storage tree and then replays
//! the bundled WAL, optionally stopping at a target timestamp.

use crate::reader::WalReader;
use crate::recovery::{replay_until, RecoveryReport};
use crate::segment;
use crate::snapshot::{decode_tree, encode_tree};
use basalt_core::error::{Error, Result};
use basalt_core::traits::KvStore;
use basalt_core::types::{Lsn, Ts};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// One file tracked by the manifest, path relative to the backup root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub size: u64,
    pub crc32: u32,
}

/// Backup manifest, serialized as pretty JSON at `<backup>/manifest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: Uuid,
    /// Wall-clock creation time, informational only
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// WAL position the data snapshot corresponds to
    pub source_lsn: Lsn,
    pub files: Vec<ManifestFile>,
}

const MANIFEST_NAME: &str = "manifest";
const DATA_FILE: &str = "data/kv.dat";

fn crc_of(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Write a consistent backup of `store` plus the WAL under `wal_dir` into
/// `dst`.
///
/// The snapshot is taken first; the copied WAL extends past it, which is
/// harmless because replay is idempotent.
pub fn create_backup(
    store: &dyn KvStore,
    wal_dir: &Path,
    source_lsn: Lsn,
    dst: &Path,
) -> Result<BackupManifest> {
    std::fs::create_dir_all(dst.join("data"))?;
    std::fs::create_dir_all(dst.join("wal"))?;

    let snapshot = store.snapshot();
    let pairs = snapshot.scan_prefix(b"")?;
    let data = encode_tree(&pairs);
    let mut files = vec![ManifestFile {
        path: DATA_FILE.to_string(),
        size: data.len() as u64,
        crc32: crc_of(&data),
    }];
    std::fs::File::create(dst.join(DATA_FILE))?.write_all(&data)?;

    for seq in segment::list_segments(wal_dir)? {
        let src_path = segment::segment_path(wal_dir, seq);
        let bytes = std::fs::read(&src_path)?;
        let rel = format!("wal/wal-{seq:08}.log");
        std::fs::write(dst.join(&rel), &bytes)?;
        files.push(ManifestFile {
            path: rel,
            size: bytes.len() as u64,
            crc32: crc_of(&bytes),
        });
    }

    let manifest = BackupManifest {
        backup_id: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        source_lsn,
        files,
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    std::fs::write(dst.join(MANIFEST_NAME), json)?;
    tracing::info!(backup_id = %manifest.backup_id, files = manifest.files.len(), "backup created");
    Ok(manifest)
}

/// Check every file in the manifest against its recorded size and CRC.
pub fn verify_backup(dir: &Path) -> Result<BackupManifest> {
    let manifest_bytes = std::fs::read(dir.join(MANIFEST_NAME))
        .map_err(|e| Error::BackupCorruption(format!("manifest unreadable: {e}")))?;
    let manifest: BackupManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| Error::BackupCorruption(format!("manifest undecodable: {e}")))?;
    for file in &manifest.files {
        let bytes = std::fs::read(dir.join(&file.path))
            .map_err(|e| Error::BackupCorruption(format!("{} unreadable: {e}", file.path)))?;
        if bytes.len() as u64 != file.size {
            return Err(Error::BackupCorruption(format!(
                "{}: size {} != manifest {}",
                file.path,
                bytes.len(),
                file.size
            )));
        }
        let crc = crc_of(&bytes);
        if crc != file.crc32 {
            return Err(Error::BackupCorruption(format!(
                "{}: crc {:08x} != manifest {:08x}",
                file.path, crc, file.crc32
            )));
        }
    }
    Ok(manifest)
}

/// Materialize `store` from the backup at `src`, replaying bundled WAL.
///
/// With `target_ts` set this is point-in-time recovery: replay stops
/// before the first commit past the target.
pub fn recover_from_backup(
    src: &Path,
    store: &dyn KvStore,
    target_ts: Option<Ts>,
) -> Result<RecoveryReport> {
    let manifest = verify_backup(src)?;
    let data = std::fs::read(src.join(DATA_FILE))?;
    for (key, value) in decode_tree(&data)? {
        store.put(key, value)?;
    }
    let outcome = WalReader::open(src.join("wal"))?.read_all()?;
    if let Some(t) = &outcome.truncation {
        // Backups are immutable; a torn record inside one is corruption,
        // not a crash artifact.
        return Err(Error::BackupCorruption(format!(
            "wal segment {} torn at offset {}: {}",
            t.segment, t.offset, t.detail
        )));
    }
    let report = replay_until(&outcome.records, store, target_ts)?;
    tracing::info!(
        backup_id = %manifest.backup_id,
        replayed = report.replayed,
        "backup restored"
    );
    Ok(report)
}
