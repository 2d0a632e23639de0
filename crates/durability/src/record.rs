//! WAL record types and their byte codec.
//!
//! # Frame layout
//!
//! ```text
//! ┌──────────────────┬───────────────────────┬───────────────────────────┐
//! │ length: u32 LE   │ payload: length bytes │ crc32: u32 LE             │
//! └──────────────────┴───────────────────────┴───────────────────────────┘
//! ```
//!
//! The CRC covers `length ‖ payload`. A frame with `length == 0` is the
//! segment tail marker written on rotation.
//!
//! # Payload layout
//!
//! The first payload byte is the record kind tag; the remaining bytes are
//! the record's fields in fixed order:
//!
//! ```text
//! Begin      0x01 | tx_id u64 | snapshot_ts u64
//! Write      0x02 | tx_id u64 | key_len u32, key | val_len u32, val | prev_len u32
//! Commit     0x03 | tx_id u64 | commit_ts u64
//! Abort      0x04 | tx_id u64
//! Checkpoint 0x05 | tx_id_watermark u64 | ts_watermark u64
//! ```
//!
//! A `Write` with `val_len == u32::MAX` carries no value bytes and encodes
//! a deletion. `prev_len == u32::MAX` means the key had no prior version.

use basalt_core::error::{Error, Result};
use basalt_core::types::{Ts, TxnId};
use byteorder::{ByteOrder, LittleEndian};

/// Sentinel length encoding "absent" for value/prev fields.
pub const LEN_NONE: u32 = u32::MAX;

const TAG_BEGIN: u8 = 0x01;
const TAG_WRITE: u8 = 0x02;
const TAG_COMMIT: u8 = 0x03;
const TAG_ABORT: u8 = 0x04;
const TAG_CHECKPOINT: u8 = 0x05;

/// One WAL record. The variant set is sealed; recovery understands exactly
/// these five.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Transaction opened.
    Begin { tx_id: TxnId, snapshot_ts: Ts },
    /// One buffered mutation. `value: None` is a deletion.
    Write {
        tx_id: TxnId,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        /// Byte length of the version this write superseded, if any
        prev_len: Option<u32>,
    },
    /// Transaction durably committed at `commit_ts`.
    Commit { tx_id: TxnId, commit_ts: Ts },
    /// Transaction rolled back; its writes are void.
    Abort { tx_id: TxnId },
    /// Recovery watermark: every transaction with id ≤ `tx_id_watermark`
    /// is fully reflected in the storage tree.
    Checkpoint { tx_id_watermark: TxnId, ts_watermark: Ts },
}

impl WalRecord {
    /// Encode the payload (kind tag + fields), without the frame.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        match self {
            WalRecord::Begin { tx_id, snapshot_ts } => {
                out.push(TAG_BEGIN);
                push_u64(&mut out, *tx_id);
                push_u64(&mut out, *snapshot_ts);
            }
            WalRecord::Write {
                tx_id,
                key,
                value,
                prev_len,
            } => {
                out.push(TAG_WRITE);
                push_u64(&mut out, *tx_id);
                push_u32(&mut out, key.len() as u32);
                out.extend_from_slice(key);
                match value {
                    Some(v) => {
                        push_u32(&mut out, v.len() as u32);
                        out.extend_from_slice(v);
                    }
                    None => push_u32(&mut out, LEN_NONE),
                }
                push_u32(&mut out, prev_len.unwrap_or(LEN_NONE));
            }
            WalRecord::Commit { tx_id, commit_ts } => {
                out.push(TAG_COMMIT);
                push_u64(&mut out, *tx_id);
                push_u64(&mut out, *commit_ts);
            }
            WalRecord::Abort { tx_id } => {
                out.push(TAG_ABORT);
                push_u64(&mut out, *tx_id);
            }
            WalRecord::Checkpoint {
                tx_id_watermark,
                ts_watermark,
            } => {
                out.push(TAG_CHECKPOINT);
                push_u64(&mut out, *tx_id_watermark);
                push_u64(&mut out, *ts_watermark);
            }
        }
        out
    }

    /// Encode the full frame: length, payload, CRC.
    pub fn encode_frame(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut frame = Vec::with_capacity(payload.len() + 8);
        let mut len_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut len_bytes, payload.len() as u32);
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&payload);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(&payload);
        let mut crc_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut crc_bytes, hasher.finalize());
        frame.extend_from_slice(&crc_bytes);
        frame
    }

    /// Decode a payload previously produced by `encode_payload`.
    pub fn decode_payload(payload: &[u8]) -> Result<WalRecord> {
        let mut cur = Cursor::new(payload);
        let tag = cur.u8()?;
        let record = match tag {
            TAG_BEGIN => WalRecord::Begin {
                tx_id: cur.u64()?,
                snapshot_ts: cur.u64()?,
            },
            TAG_WRITE => {
                let tx_id = cur.u64()?;
                let key_len = cur.u32()? as usize;
                let key = cur.bytes(key_len)?.to_vec();
                let val_len = cur.u32()?;
                let value = if val_len == LEN_NONE {
                    None
                } else {
                    Some(cur.bytes(val_len as usize)?.to_vec())
                };
                let prev_len = match cur.u32()? {
                    LEN_NONE => None,
                    n => Some(n),
                };
                WalRecord::Write {
                    tx_id,
                    key,
                    value,
                    prev_len,
                }
            }
            TAG_COMMIT => WalRecord::Commit {
                tx_id: cur.u64()?,
                commit_ts: cur.u64()?,
            },
            TAG_ABORT => WalRecord::Abort { tx_id: cur.u64()? },
            TAG_CHECKPOINT => WalRecord::Checkpoint {
                tx_id_watermark: cur.u64()?,
                ts_watermark: cur.u64()?,
            },
            other => {
                return Err(Error::Serialization(format!(
                    "unknown WAL record tag 0x{other:02x}"
                )))
            }
        };
        if !cur.at_end() {
            return Err(Error::Serialization(
                "trailing bytes after WAL record payload".to_string(),
            ));
        }
        Ok(record)
    }

    /// Transaction id this record belongs to, if any.
    pub fn tx_id(&self) -> Option<TxnId> {
        match self {
            WalRecord::Begin { tx_id, .. }
            | WalRecord::Write { tx_id, .. }
            | WalRecord::Commit { tx_id, .. }
            | WalRecord::Abort { tx_id } => Some(*tx_id),
            WalRecord::Checkpoint { .. } => None,
        }
    }
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    out.extend_from_slice(&b);
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Serialization(
                "WAL record payload shorter than declared".to_string(),
            ));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }
}
