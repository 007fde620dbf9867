//! Field buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` so extracted payloads are split off without copying.
//! Parsing is a two-state machine:
//! - `WaitingForHeader`: tag and length not yet complete (1-10 bytes)
//! - `WaitingForPayload`: header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use honeypot_ipc::tagging::{FieldBuffer, TagWriter};
//!
//! let mut writer = TagWriter::new();
//! writer.put_string(1, "first");
//! writer.put_string(1, "second");
//! let bytes = writer.freeze();
//!
//! let mut buffer = FieldBuffer::new();
//! assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
//! let fields = buffer.push(&bytes[4..]).unwrap();
//! assert_eq!(fields.len(), 2);
//! assert_eq!(&fields[1].payload[..], b"second");
//! ```

use bytes::{Bytes, BytesMut};

use super::stream::{parse_header, FieldHeader, Tag};
use super::varint::ESCAPE;
use crate::error::{IpcError, Result};

/// Default upper bound for one field's declared length (16 MB).
pub const DEFAULT_MAX_FIELD_LEN: u32 = 16 * 1024 * 1024;

/// A complete top-level field that owns its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedField {
    /// Field tag.
    pub tag: Tag,
    /// Payload bytes.
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForPayload { tag: Tag, remaining: usize },
}

/// Buffer for incoming bytes that yields complete fields.
pub struct FieldBuffer {
    buffer: BytesMut,
    state: State,
    max_field_len: u32,
}

impl FieldBuffer {
    /// Create a buffer with the default field limit.
    pub fn new() -> Self {
        Self::with_max_field(DEFAULT_MAX_FIELD_LEN)
    }

    /// Create a buffer rejecting fields that declare more than `max_field_len`
    /// payload bytes.
    pub fn with_max_field(max_field_len: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHeader,
            max_field_len,
        }
    }

    /// Push data into the buffer and extract all complete fields.
    ///
    /// Partial trailing data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns `MalformedStream` if a field declares more than the limit.
    /// The buffer should be discarded after an error.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<OwnedField>> {
        self.buffer.extend_from_slice(data);

        let mut fields = Vec::new();
        while let Some(field) = self.try_extract_one()? {
            fields.push(field);
        }
        Ok(fields)
    }

    fn try_extract_one(&mut self) -> Result<Option<OwnedField>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(header) = self.complete_header()? else {
                        return Ok(None);
                    };
                    if header.length > self.max_field_len {
                        return Err(IpcError::malformed(format!(
                            "tag {} declares {} bytes, limit is {}",
                            header.tag, header.length, self.max_field_len
                        )));
                    }
                    let _ = self.buffer.split_to(header.header_len);
                    self.state = State::WaitingForPayload {
                        tag: header.tag,
                        remaining: header.length as usize,
                    };
                }
                State::WaitingForPayload { tag, remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(OwnedField { tag, payload }));
                }
            }
        }
    }

    /// Parse the header at the front of the buffer once all of its bytes
    /// have arrived.
    fn complete_header(&self) -> Result<Option<FieldHeader>> {
        let tag_len = match self.buffer.first() {
            None => return Ok(None),
            Some(&ESCAPE) => 5,
            Some(_) => 1,
        };
        let len_len = match self.buffer.get(tag_len) {
            None => return Ok(None),
            Some(&ESCAPE) => 5,
            Some(_) => 1,
        };
        if self.buffer.len() < tag_len + len_len {
            return Ok(None);
        }
        parse_header(&self.buffer).map(Some)
    }

    /// Number of buffered bytes not yet returned as fields.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer holds no pending bytes.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if the buffer is between fields.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::WaitingForHeader) && self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }
}

impl Default for FieldBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::TagWriter;

    fn two_fields() -> Bytes {
        let mut writer = TagWriter::new();
        writer.put_u16(5, 443);
        writer.put_fixed(300, &[0x5A; 260]);
        writer.freeze()
    }

    #[test]
    fn test_complete_fields_in_one_push() {
        let mut buffer = FieldBuffer::new();
        let fields = buffer.push(&two_fields()).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].tag, 5);
        assert_eq!(&fields[0].payload[..], &443u16.to_be_bytes());
        assert_eq!(fields[1].tag, 300);
        assert_eq!(fields[1].payload.len(), 260);
        assert!(buffer.is_idle());
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = two_fields();
        let mut buffer = FieldBuffer::new();
        let mut all = Vec::new();
        for byte in bytes.iter() {
            all.extend(buffer.push(&[*byte]).unwrap());
        }
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].tag, 300);
        assert!(all[1].payload.iter().all(|&b| b == 0x5A));
        assert!(buffer.is_idle());
    }

    #[test]
    fn test_partial_escaped_header_waits() {
        let bytes = two_fields();
        let mut buffer = FieldBuffer::new();
        // First field plus the first 3 bytes of the escaped tag
        let frames = buffer.push(&bytes[..7]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.is_idle());

        let frames = buffer.push(&bytes[7..]).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_empty_payload_field() {
        let mut writer = TagWriter::new();
        writer.put_fixed(8, &[]);
        let mut buffer = FieldBuffer::new();
        let fields = buffer.push(writer.as_slice()).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields[0].payload.is_empty());
    }

    #[test]
    fn test_field_limit_enforced() {
        let mut buffer = FieldBuffer::with_max_field(100);
        let mut writer = TagWriter::new();
        writer.put_fixed(1, &[0; 101]);
        let err = buffer.push(&writer.as_slice()[..6]).unwrap_err();
        assert!(err.to_string().contains("limit is 100"));
    }

    #[test]
    fn test_clear_resets_state() {
        let bytes = two_fields();
        let mut buffer = FieldBuffer::new();
        buffer.push(&bytes[..5]).unwrap();
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_idle());

        let fields = buffer.push(&bytes).unwrap();
        assert_eq!(fields.len(), 2);
    }
}
