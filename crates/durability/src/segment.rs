//! WAL segment files.
//!
//! Segments are named `wal-NNNNNNNN.log` with a zero-padded sequence
//! number. Each starts with a fixed header; records follow back to back.
//! Records never span segments: rotation writes a tail marker (a zero
//! length word) and opens the next file with the next sequence number.
//!
//! # Header layout (32 bytes)
//!
//! ```text
//! ┌──────────┬─────────────────┬──────────────────┬────────────────────┐
//! │ magic 4B │ format_ver u32  │ sequence u64     │ database_uuid 16B  │
//! └──────────┴─────────────────┴──────────────────┴────────────────────┘
//! ```

use basalt_core::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a Basalt WAL segment: "BSLT".
pub const SEGMENT_MAGIC: [u8; 4] = *b"BSLT";

/// Current on-disk format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Header size in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Tail marker: a zero length word terminating a rotated segment.
pub const TAIL_MARKER: [u8; 4] = [0u8; 4];

/// Segment file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub sequence: u64,
    pub database_uuid: [u8; 16],
}

impl SegmentHeader {
    pub fn new(sequence: u64, database_uuid: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            sequence,
            database_uuid,
        }
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut b = [0u8; SEGMENT_HEADER_SIZE];
        b[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut b[4..8], self.format_version);
        LittleEndian::write_u64(&mut b[8..16], self.sequence);
        b[16..32].copy_from_slice(&self.database_uuid);
        b
    }

    pub fn from_bytes(b: &[u8; SEGMENT_HEADER_SIZE]) -> Result<Self> {
        let header = SegmentHeader {
            magic: b[0..4].try_into().expect("slice length 4"),
            format_version: LittleEndian::read_u32(&b[4..8]),
            sequence: LittleEndian::read_u64(&b[8..16]),
            database_uuid: b[16..32].try_into().expect("slice length 16"),
        };
        if header.magic != SEGMENT_MAGIC {
            return Err(Error::WalCorruption {
                segment: header.sequence,
                offset: 0,
                detail: "bad segment magic".to_string(),
            });
        }
        if header.format_version != SEGMENT_FORMAT_VERSION {
            return Err(Error::WalCorruption {
                segment: header.sequence,
                offset: 0,
                detail: format!("unsupported format version {}", header.format_version),
            });
        }
        Ok(header)
    }
}

/// Path of segment `sequence` inside `dir`.
pub fn segment_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("wal-{sequence:08}.log"))
}

/// Sequence numbers of all segments in `dir`, ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut seqs = Vec::new();
    if !dir.exists() {
        return Ok(seqs);
    }
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(num) = name
            .strip_prefix("wal-")
            .and_then(|s| s.strip_suffix(".log"))
        {
            if let Ok(seq) = num.parse::<u64>() {
                seqs.push(seq);
            }
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

/// Writable handle on the active segment.
pub struct Segment {
    file: File,
    sequence: u64,
    /// Bytes written so far, header included
    size: u64,
    path: PathBuf,
}

impl Segment {
    /// Create a fresh segment and write its header.
    pub fn create(dir: &Path, sequence: u64, database_uuid: [u8; 16]) -> Result<Self> {
        let path = segment_path(dir, sequence);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&SegmentHeader::new(sequence, database_uuid).to_bytes())?;
        Ok(Segment {
            file,
            sequence,
            size: SEGMENT_HEADER_SIZE as u64,
            path,
        })
    }

    /// Reopen an existing segment for appending, validating its header.
    pub fn open_append(dir: &Path, sequence: u64) -> Result<Self> {
        let path = segment_path(dir, sequence);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = SegmentHeader::from_bytes(&header_bytes)?;
        if header.sequence != sequence {
            return Err(Error::WalCorruption {
                segment: sequence,
                offset: 0,
                detail: format!("header claims sequence {}", header.sequence),
            });
        }
        let size = file.seek(SeekFrom::End(0))?;
        Ok(Segment {
            file,
            sequence,
            size,
            path,
        })
    }

    /// Append raw frame bytes.
    pub fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.file.write_all(frame)?;
        self.size += frame.len() as u64;
        Ok(())
    }

    /// fsync file contents.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Write the tail marker, sync, and consume the handle.
    pub fn close(mut self) -> Result<()> {
        self.file.write_all(&TAIL_MARKER)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Physically truncate the file to `len` bytes and sync. Used when a
    /// torn record is found at the tail during recovery.
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::End(0))?;
        self.size = len;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
