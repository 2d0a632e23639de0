//! WAL reader.
//!
//! Reads segments forward in sequence order, validating each frame's CRC.
//! The first torn or corrupt record truncates the log: everything from
//! that byte onward (including later segments) is discarded, and the
//! truncation point is reported so recovery can surface the data-loss
//! window and physically trim the file.
//!
//! LSNs are not stored in frames; the reader numbers records sequentially
//! from 1 across the segments it reads, and the writer resumes from the
//! count. Retention therefore rebases LSNs, which is fine because nothing
//! durable refers to an absolute LSN except the backup manifest, which
//! captures its own base.

use crate::record::WalRecord;
use crate::segment::{self, SegmentHeader, SEGMENT_HEADER_SIZE};
use basalt_core::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Upper bound on a single record payload; anything larger is treated as
/// corruption rather than an allocation request.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Where and why the log was cut short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// Segment containing the offending record
    pub segment: u64,
    /// Byte offset of the record's length word
    pub offset: u64,
    /// Cause, for the operator log
    pub detail: String,
}

/// Result of a full log scan.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Every intact record, in LSN order
    pub records: Vec<WalRecord>,
    /// Set when the scan stopped before end of log
    pub truncation: Option<Truncation>,
}

/// Forward reader over all segments in a WAL directory.
pub struct WalReader {
    dir: PathBuf,
    segments: Vec<u64>,
}

impl WalReader {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let segments = segment::list_segments(&dir)?;
        Ok(WalReader { dir, segments })
    }

    /// Sequence numbers of the segments this reader will visit.
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// Read every record up to the first corruption.
    pub fn read_all(&self) -> Result<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        for &seq in &self.segments {
            match self.read_segment(seq, &mut outcome.records)? {
                SegmentEnd::Clean => {}
                SegmentEnd::Truncated(t) => {
                    tracing::error!(
                        segment = t.segment,
                        offset = t.offset,
                        detail = %t.detail,
                        "wal corruption; log truncated"
                    );
                    outcome.truncation = Some(t);
                    break;
                }
            }
        }
        Ok(outcome)
    }

    fn read_segment(&self, seq: u64, records: &mut Vec<WalRecord>) -> Result<SegmentEnd> {
        let path = segment::segment_path(&self.dir, seq);
        let mut file = File::open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.len() < SEGMENT_HEADER_SIZE {
            return Ok(SegmentEnd::Truncated(Truncation {
                segment: seq,
                offset: 0,
                detail: "segment shorter than header".to_string(),
            }));
        }
        let header_bytes: [u8; SEGMENT_HEADER_SIZE] =
            buf[..SEGMENT_HEADER_SIZE].try_into().expect("header slice");
        SegmentHeader::from_bytes(&header_bytes)?;

        let mut pos = SEGMENT_HEADER_SIZE;
        loop {
            if pos == buf.len() {
                // Active segment: ends exactly at the last record.
                return Ok(SegmentEnd::Clean);
            }
            if pos + 4 > buf.len() {
                return Ok(SegmentEnd::Truncated(Truncation {
                    segment: seq,
                    offset: pos as u64,
                    detail: "torn length word".to_string(),
                }));
            }
            let len = LittleEndian::read_u32(&buf[pos..pos + 4]);
            if len == 0 {
                // Tail marker: segment was rotated cleanly.
                return Ok(SegmentEnd::Clean);
            }
            if len > MAX_RECORD_LEN {
                return Ok(SegmentEnd::Truncated(Truncation {
                    segment: seq,
                    offset: pos as u64,
                    detail: format!("implausible record length {len}"),
                }));
            }
            let frame_end = pos + 4 + len as usize + 4;
            if frame_end > buf.len() {
                return Ok(SegmentEnd::Truncated(Truncation {
                    segment: seq,
                    offset: pos as u64,
                    detail: "record runs past end of file".to_string(),
                }));
            }
            let payload = &buf[pos + 4..pos + 4 + len as usize];
            let stored_crc = LittleEndian::read_u32(&buf[pos + 4 + len as usize..frame_end]);
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&buf[pos..pos + 4 + len as usize]);
            if hasher.finalize() != stored_crc {
                return Ok(SegmentEnd::Truncated(Truncation {
                    segment: seq,
                    offset: pos as u64,
                    detail: "crc mismatch".to_string(),
                }));
            }
            match WalRecord::decode_payload(payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Ok(SegmentEnd::Truncated(Truncation {
                        segment: seq,
                        offset: pos as u64,
                        detail: format!("undecodable payload: {e}"),
                    }))
                }
            }
            pos = frame_end;
        }
    }

    /// Physically discard everything from the truncation point on: trim
    /// the offending segment and delete all later segments.
    pub fn truncate_at(&self, truncation: &Truncation) -> Result<()> {
        let mut seg = crate::segment::Segment::open_append(&self.dir, truncation.segment)?;
        seg.truncate_to(truncation.offset.max(SEGMENT_HEADER_SIZE as u64))?;
        for &seq in &self.segments {
            if seq > truncation.segment {
                std::fs::remove_file(segment::segment_path(&self.dir, seq))?;
            }
        }
        Ok(())
    }

    /// The truncation as an integrity error, for operator surfacing.
    pub fn corruption_error(t: &Truncation) -> Error {
        Error::WalCorruption {
            segment: t.segment,
            offset: t.offset,
            detail: t.detail.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

enum SegmentEnd {
    Clean,
    Truncated(Truncation),
}
