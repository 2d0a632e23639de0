//! Storage tree snapshots.
//!
//! A checkpoint is only allowed to drop WAL segments once the storage
//! tree they rebuilt is durable somewhere else; that somewhere is the
//! snapshot file. The writer streams the tree as length-prefixed
//! `(key, value)` pairs behind a CRC'd header and installs it with a
//! tmp-file rename, so a crash mid-snapshot leaves the previous one
//! intact.
//!
//! Recovery loads the snapshot (when present) before replaying the WAL;
//! replaying records already reflected in the snapshot is idempotent.

use basalt_core::error::{Error, Result};
use basalt_core::traits::KvStore;
use byteorder::{ByteOrder, LittleEndian};
use std::io::Write;
use std::path::Path;

/// Snapshot file magic: "BSNP".
const SNAPSHOT_MAGIC: [u8; 4] = *b"BSNP";

/// File name inside the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.dat";

/// Serialize `(key, value)` pairs as the snapshot body.
pub(crate) fn encode_tree(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut len = [0u8; 4];
    for (k, v) in pairs {
        LittleEndian::write_u32(&mut len, k.len() as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(k);
        LittleEndian::write_u32(&mut len, v.len() as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(v);
    }
    out
}

pub(crate) fn decode_tree(bytes: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut pairs = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if pos + 4 > bytes.len() {
            return Err(Error::StorageCorruption("torn key length".to_string()));
        }
        let klen = LittleEndian::read_u32(&bytes[pos..pos + 4]) as usize;
        pos += 4;
        if pos + klen + 4 > bytes.len() {
            return Err(Error::StorageCorruption("torn key or value".to_string()));
        }
        let key = bytes[pos..pos + klen].to_vec();
        pos += klen;
        let vlen = LittleEndian::read_u32(&bytes[pos..pos + 4]) as usize;
        pos += 4;
        if pos + vlen > bytes.len() {
            return Err(Error::StorageCorruption("torn value".to_string()));
        }
        pairs.push((key, bytes[pos..pos + vlen].to_vec()));
        pos += vlen;
    }
    Ok(pairs)
}

fn crc_of(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Write a durable snapshot of `store` into `dir`, replacing any
/// previous one atomically.
pub fn write_snapshot(dir: &Path, store: &dyn KvStore) -> Result<()> {
    let pairs = store.snapshot().scan_prefix(b"")?;
    let body = encode_tree(&pairs);

    let mut file_bytes = Vec::with_capacity(body.len() + 12);
    file_bytes.extend_from_slice(&SNAPSHOT_MAGIC);
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, body.len() as u32);
    file_bytes.extend_from_slice(&word);
    file_bytes.extend_from_slice(&body);
    LittleEndian::write_u32(&mut word, crc_of(&body));
    file_bytes.extend_from_slice(&word);

    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    let final_path = dir.join(SNAPSHOT_FILE);
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(&file_bytes)?;
        f.sync_data()?;
    }
    std::fs::rename(&tmp, &final_path)?;
    tracing::debug!(keys = pairs.len(), "snapshot written");
    Ok(())
}

/// Load the snapshot in `dir` into `store`, if one exists. Returns the
/// number of keys installed.
pub fn load_snapshot(dir: &Path, store: &dyn KvStore) -> Result<usize> {
    let path = dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(0);
    }
    let bytes = std::fs::read(&path)?;
    if bytes.len() < 12 || bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(Error::StorageCorruption(
            "snapshot header invalid".to_string(),
        ));
    }
    let body_len = LittleEndian::read_u32(&bytes[4..8]) as usize;
    if bytes.len() != 12 + body_len {
        return Err(Error::StorageCorruption(format!(
            "snapshot length {} does not match header {}",
            bytes.len(),
            12 + body_len
        )));
    }
    let body = &bytes[8..8 + body_len];
    let stored_crc = LittleEndian::read_u32(&bytes[8 + body_len..]);
    if crc_of(body) != stored_crc {
        return Err(Error::StorageCorruption("snapshot crc mismatch".to_string()));
    }
    let pairs = decode_tree(body)?;
    let count = pairs.len();
    for (k, v) in pairs {
        store.put(k, v)?;
    }
    Ok(count)
}
