//! Cluster wire codec.
//!
//! Frames are `length: u32 LE | payload`, where the payload is the
//! bincode encoding of `Message` (a leading variant tag, then fields in
//! declaration order). Delivery may duplicate frames; handlers are
//! idempotent at the `(view, op_number)` level, so the codec makes no
//! exactly-once promises.

use crate::message::Message;
use basalt_core::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Largest accepted frame; larger lengths are treated as corruption.
const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Encode one message as a length-prefixed frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let payload = bincode::serialize(msg)?;
    let mut frame = Vec::with_capacity(payload.len() + 4);
    let mut len = [0u8; 4];
    LittleEndian::write_u32(&mut len, payload.len() as u32);
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one frame from the front of `buf`, returning the message and
/// the bytes consumed. `Ok(None)` means the buffer holds an incomplete
/// frame.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = LittleEndian::read_u32(&buf[0..4]);
    if len > MAX_FRAME {
        return Err(Error::Serialization(format!(
            "frame length {len} exceeds limit"
        )));
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let msg: Message = bincode::deserialize(&buf[4..total])?;
    Ok(Some((msg, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{KvOp, LogEntry, Request};

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Request(Request {
                client_id: 7,
                request_number: 3,
                op: KvOp::Put {
                    key: b"k".to_vec(),
                    value: b"v".to_vec(),
                },
            }),
            Message::Prepare {
                view: 2,
                op_number: 9,
                commit_number: 8,
                entry: LogEntry {
                    op_number: 9,
                    view: 2,
                    client_id: 7,
                    request_number: 3,
                    op: KvOp::Delete { key: b"k".to_vec() },
                },
            },
            Message::PrepareOk {
                view: 2,
                op_number: 9,
            },
            Message::Heartbeat { view: 2, ts: 100 },
            Message::StartViewChange { view: 3 },
            Message::GetState {
                view: 3,
                op_number: 0,
            },
        ]
    }

    #[test]
    fn test_round_trip_all_kinds() {
        for msg in sample_messages() {
            let frame = encode(&msg).unwrap();
            let (decoded, consumed) = decode(&frame).unwrap().unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(consumed, frame.len());
        }
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = encode(&Message::StartViewChange { view: 1 }).unwrap();
        assert!(decode(&frame[..2]).unwrap().is_none());
        assert!(decode(&frame[..frame.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = encode(&Message::StartViewChange { view: 1 }).unwrap();
        buf.extend(encode(&Message::Heartbeat { view: 1, ts: 5 }).unwrap());
        let (first, consumed) = decode(&buf).unwrap().unwrap();
        assert_eq!(first, Message::StartViewChange { view: 1 });
        let (second, _) = decode(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(second, Message::Heartbeat { view: 1, ts: 5 });
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = vec![0u8; 8];
        LittleEndian::write_u32(&mut buf[0..4], u32::MAX);
        assert!(decode(&buf).is_err());
    }
}
