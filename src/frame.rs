//! Component A — length-prefixed binary framing with a JSON header and raw
//! payload segments (spec §4.A).
//!
//! ```text
//! u32 be total_len
//!   u32 be header_len
//!   header_json[header_len]          // UTF-8 JSON object
//!   payload_bytes[total_len - 4 - header_len]
//! ```
//!
//! `total_len` counts everything after itself: the header-length field, the
//! header bytes and the payload bytes.

use std::collections::VecDeque;

use serde_json::Value;

use crate::error::{OpenmuxError, Result};

/// A decoded frame: the JSON header plus however many payload segments its
/// `payloadLengths` (if any) describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Value,
    pub payloads: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(header: Value, payloads: Vec<Vec<u8>>) -> Self {
        Frame { header, payloads }
    }

    pub fn header_only(header: Value) -> Self {
        Frame { header, payloads: Vec::new() }
    }

    pub fn single_payload(header: Value, payload: Vec<u8>) -> Self {
        Frame { header, payloads: vec![payload] }
    }

    /// `type` discriminator carried in the header, if present and a string.
    pub fn kind(&self) -> Option<&str> {
        self.header.get("type").and_then(Value::as_str)
    }

    /// The single payload, if there is exactly one. Convenience for the
    /// common case of a frame carrying one raw byte blob.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payloads.first().map(Vec::as_slice)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.header.clone();
        if self.payloads.len() != 1 || header.get("payloadLengths").is_some() {
            let lengths: Vec<u64> = self.payloads.iter().map(|p| p.len() as u64).collect();
            if let Value::Object(ref mut map) = header {
                map.insert("payloadLengths".to_string(), Value::from(lengths));
            }
        }
        let header_bytes = serde_json::to_vec(&header).expect("header must serialize");
        let header_len = header_bytes.len() as u32;
        let payload_len: usize = self.payloads.iter().map(Vec::len).sum();
        let total_len = 4u32 + header_len + payload_len as u32;

        let mut out = Vec::with_capacity(4 + total_len as usize);
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&header_len.to_be_bytes());
        out.extend_from_slice(&header_bytes);
        for p in &self.payloads {
            out.extend_from_slice(p);
        }
        out
    }
}

/// Streaming decoder: feed it arbitrary byte chunks (any split, any number of
/// frames per chunk) and it yields complete `Frame`s as they become
/// available. Never returns a partial frame.
#[derive(Default)]
pub struct FrameDecoder {
    buf: VecDeque<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder { buf: VecDeque::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend(chunk.iter().copied());
    }

    /// Attempts to decode and remove one complete frame from the buffer.
    /// Returns `Ok(None)` if more bytes are needed. Returns `Err` on a
    /// malformed frame (bad JSON header, payload-length mismatch); the
    /// caller should treat this as a fatal decode error for the socket.
    pub fn try_decode(&mut self) -> Result<Option<Frame>> {
        // total_len (u32) + header_len (u32) prefix.
        if self.buf.len() < 8 {
            return Ok(None);
        }
        let total_len = read_u32(&self.buf, 0) as usize;
        let frame_bytes_needed = 4 + total_len; // the total_len field itself plus total_len bytes
        if self.buf.len() < frame_bytes_needed {
            return Ok(None);
        }
        let header_len = read_u32(&self.buf, 4) as usize;
        if header_len + 4 > total_len {
            return Err(OpenmuxError::invalid("frame header_len exceeds total_len"));
        }
        let header_start = 8;
        let header_end = header_start + header_len;
        let header_bytes: Vec<u8> = self.buf.iter().skip(header_start).take(header_len).copied().collect();
        let header: Value = serde_json::from_slice(&header_bytes)
            .map_err(|e| OpenmuxError::invalid(format!("bad frame header json: {e}")))?;

        let payload_total = total_len - 4 - header_len;
        let payload_bytes: Vec<u8> = self.buf.iter().skip(header_end).take(payload_total).copied().collect();

        let payloads = split_payloads(&header, payload_bytes)?;

        let consumed = frame_bytes_needed;
        self.buf.drain(0..consumed);

        Ok(Some(Frame { header, payloads }))
    }
}

fn read_u32(buf: &VecDeque<u8>, offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    for (i, b) in buf.iter().skip(offset).take(4).enumerate() {
        bytes[i] = *b;
    }
    u32::from_be_bytes(bytes)
}

fn split_payloads(header: &Value, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
    match header.get("payloadLengths").and_then(Value::as_array) {
        None => {
            if bytes.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![bytes])
            }
        }
        Some(lengths) => {
            let mut out = Vec::with_capacity(lengths.len());
            let mut offset = 0usize;
            for l in lengths {
                let len = l
                    .as_u64()
                    .ok_or_else(|| OpenmuxError::invalid("payloadLengths entry not a number"))?
                    as usize;
                if offset + len > bytes.len() {
                    return Err(OpenmuxError::invalid("payloadLengths exceeds payload bytes"));
                }
                out.push(bytes[offset..offset + len].to_vec());
                offset += len;
            }
            if offset != bytes.len() {
                return Err(OpenmuxError::invalid("payloadLengths does not cover all payload bytes"));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_single_payload() {
        let frame = Frame::single_payload(json!({"type": "event"}), b"abc".to_vec());
        let bytes = frame.encode();
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        let decoded = dec.try_decode().unwrap().unwrap();
        assert_eq!(decoded.kind(), Some("event"));
        assert_eq!(decoded.payload(), Some(b"abc".as_slice()));
    }

    #[test]
    fn round_trip_multi_payload() {
        let frame = Frame::new(json!({"type": "multi"}), vec![b"ab".to_vec(), b"cde".to_vec(), b"".to_vec()]);
        let bytes = frame.encode();
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        let decoded = dec.try_decode().unwrap().unwrap();
        assert_eq!(decoded.payloads, vec![b"ab".to_vec(), b"cde".to_vec(), b"".to_vec()]);
    }

    #[test]
    fn tolerates_arbitrary_chunk_splits() {
        let frame = Frame::single_payload(json!({"type": "event"}), b"abc".to_vec());
        let bytes = frame.encode();
        for k in 0..=bytes.len() {
            let mut dec = FrameDecoder::new();
            dec.feed(&bytes[..k]);
            let first = dec.try_decode().unwrap();
            if k < bytes.len() {
                assert!(first.is_none(), "split at {k} should not yet yield a frame");
                dec.feed(&bytes[k..]);
                let decoded = dec.try_decode().unwrap().unwrap();
                assert_eq!(decoded.payload(), Some(b"abc".as_slice()));
            } else {
                let decoded = first.unwrap();
                assert_eq!(decoded.payload(), Some(b"abc".as_slice()));
            }
        }
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let f1 = Frame::single_payload(json!({"type": "a"}), b"one".to_vec());
        let f2 = Frame::single_payload(json!({"type": "b"}), b"two".to_vec());
        let mut combined = f1.encode();
        combined.extend(f2.encode());

        let mut dec = FrameDecoder::new();
        dec.feed(&combined);
        let d1 = dec.try_decode().unwrap().unwrap();
        let d2 = dec.try_decode().unwrap().unwrap();
        assert_eq!(d1.kind(), Some("a"));
        assert_eq!(d2.kind(), Some("b"));
        assert!(dec.try_decode().unwrap().is_none());
    }

    #[test]
    fn unknown_header_keys_ignored() {
        let frame = Frame::single_payload(json!({"type": "event", "mystery": 42}), b"x".to_vec());
        let bytes = frame.encode();
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        let decoded = dec.try_decode().unwrap().unwrap();
        assert_eq!(decoded.kind(), Some("event"));
    }
}
