//! Tag stream writer and reader.
//!
//! Each field on the wire is:
//! ```text
//! ┌──────────┬──────────┬─────────────────┐
//! │ Tag      │ Length   │ Payload         │
//! │ 1|5 bytes│ 1|5 bytes│ `Length` bytes  │
//! └──────────┴──────────┴─────────────────┘
//! ```
//!
//! Tag and length use the escape form from [`super::varint`]. Multi-byte
//! integer payloads are Big Endian. There is no padding and no stream
//! header; a nested stream is just the payload of one field.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};

use super::varint::{decode_number, encode_number, encoded_len};
use crate::error::{IpcError, Result};

/// Field tag. Tag 0 is reserved and never written by this crate.
pub type Tag = u32;

/// Reserved tag value.
pub const RESERVED_TAG: Tag = 0;

/// Wire size of an encoded [`Timestamp`] (u64 seconds + u32 microseconds).
pub const TIMESTAMP_LEN: usize = 12;

const MICROS_PER_SEC: u32 = 1_000_000;

/// Wall-clock instant with microsecond resolution.
///
/// The microsecond part is always below one second, so every value that can
/// be built can also be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: u64,
    micros: u32,
}

impl Timestamp {
    /// Create a new timestamp. Whole seconds in `micros` carry into `secs`.
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs.saturating_add(u64::from(micros / MICROS_PER_SEC)),
            micros: micros % MICROS_PER_SEC,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// Seconds since the Unix epoch.
    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Microseconds within the second.
    pub fn micros(&self) -> u32 {
        self.micros
    }

    fn to_bytes(self) -> [u8; TIMESTAMP_LEN] {
        let mut buf = [0u8; TIMESTAMP_LEN];
        buf[0..8].copy_from_slice(&self.secs.to_be_bytes());
        buf[8..12].copy_from_slice(&self.micros.to_be_bytes());
        buf
    }

    fn from_bytes(buf: [u8; TIMESTAMP_LEN]) -> Result<Self> {
        let secs = u64::from_be_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]);
        let micros = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if micros >= MICROS_PER_SEC {
            return Err(IpcError::malformed(format!(
                "timestamp microseconds out of range: {}",
                micros
            )));
        }
        Ok(Self { secs, micros })
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        // Pre-epoch clocks clamp to the epoch
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since.as_secs(),
            micros: since.subsec_micros(),
        }
    }
}

impl From<Timestamp> for SystemTime {
    /// # Panics
    ///
    /// Panics if the instant is beyond what the platform `SystemTime` can
    /// represent.
    fn from(ts: Timestamp) -> Self {
        UNIX_EPOCH + Duration::from_secs(ts.secs) + Duration::from_micros(u64::from(ts.micros))
    }
}

/// Growable buffer that fields are appended to.
///
/// # Example
///
/// ```
/// use honeypot_ipc::tagging::{TagReader, TagWriter};
///
/// let mut writer = TagWriter::new();
/// writer.put_u16(5, 8080);
/// writer.put_string(9, "Linux 2.4");
///
/// let bytes = writer.freeze();
/// let mut reader = TagReader::new(&bytes);
/// assert_eq!(reader.expect(5).unwrap().u16().unwrap(), 8080);
/// assert_eq!(reader.expect(9).unwrap().string().unwrap(), "Linux 2.4");
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct TagWriter {
    buf: BytesMut,
}

impl TagWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append one field with a raw payload. Every other `put_*` method goes
    /// through here.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is [`RESERVED_TAG`] or if `payload` is longer than
    /// `u32::MAX` bytes.
    pub fn put_fixed(&mut self, tag: Tag, payload: &[u8]) {
        assert_ne!(tag, RESERVED_TAG, "tag 0 is reserved");
        let len = u32::try_from(payload.len()).expect("tag field payload exceeds u32::MAX");
        self.buf
            .reserve(encoded_len(tag) + encoded_len(len) + payload.len());
        encode_number(tag, &mut self.buf);
        encode_number(len, &mut self.buf);
        self.buf.extend_from_slice(payload);
    }

    /// Append a one-byte integer field.
    #[inline]
    pub fn put_u8(&mut self, tag: Tag, value: u8) {
        self.put_fixed(tag, &[value]);
    }

    /// Append a two-byte Big Endian integer field.
    #[inline]
    pub fn put_u16(&mut self, tag: Tag, value: u16) {
        self.put_fixed(tag, &value.to_be_bytes());
    }

    /// Append a four-byte Big Endian integer field.
    #[inline]
    pub fn put_u32(&mut self, tag: Tag, value: u32) {
        self.put_fixed(tag, &value.to_be_bytes());
    }

    /// Append an eight-byte Big Endian integer field.
    #[inline]
    pub fn put_u64(&mut self, tag: Tag, value: u64) {
        self.put_fixed(tag, &value.to_be_bytes());
    }

    /// Append a string field. No terminator is written.
    #[inline]
    pub fn put_string(&mut self, tag: Tag, value: &str) {
        self.put_fixed(tag, value.as_bytes());
    }

    /// Append a complete nested tag stream as one field.
    #[inline]
    pub fn put_buffer(&mut self, tag: Tag, nested: &TagWriter) {
        self.put_fixed(tag, nested.as_slice());
    }

    /// Append a timestamp field.
    #[inline]
    pub fn put_timestamp(&mut self, tag: Tag, ts: Timestamp) {
        self.put_fixed(tag, &ts.to_bytes());
    }

    /// Encoded bytes written so far.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of encoded bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop all written fields, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Consume the writer and return the encoded stream.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Tag and length of the next field, as seen by [`TagReader::peek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    /// Field tag.
    pub tag: Tag,
    /// Payload length in bytes.
    pub length: u32,
    /// Bytes occupied by the encoded tag and length.
    pub header_len: usize,
}

impl FieldHeader {
    /// Total bytes of the field on the wire.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.header_len + self.length as usize
    }
}

/// Parse a field header from the front of `buf` without checking that the
/// payload is present.
pub(crate) fn parse_header(buf: &[u8]) -> Result<FieldHeader> {
    let (tag, tag_len) = decode_number(buf)?;
    let (length, len_len) = decode_number(&buf[tag_len..])
        .map_err(|e| IpcError::malformed(format!("length of tag {}: {}", tag, e)))?;
    Ok(FieldHeader {
        tag,
        length,
        header_len: tag_len + len_len,
    })
}

/// One decoded field borrowing its payload from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field tag.
    pub tag: Tag,
    /// Payload bytes.
    pub payload: &'a [u8],
}

impl<'a> Field<'a> {
    /// Payload as a fixed-size array; any other width is malformed.
    pub fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        self.payload.try_into().map_err(|_| {
            IpcError::malformed(format!(
                "tag {} expected {} bytes, got {}",
                self.tag,
                N,
                self.payload.len()
            ))
        })
    }

    /// Payload as a one-byte integer.
    pub fn u8(&self) -> Result<u8> {
        Ok(self.fixed::<1>()?[0])
    }

    /// Payload as a two-byte Big Endian integer.
    pub fn u16(&self) -> Result<u16> {
        self.fixed().map(u16::from_be_bytes)
    }

    /// Payload as a four-byte Big Endian integer.
    pub fn u32(&self) -> Result<u32> {
        self.fixed().map(u32::from_be_bytes)
    }

    /// Payload as an eight-byte Big Endian integer.
    pub fn u64(&self) -> Result<u64> {
        self.fixed().map(u64::from_be_bytes)
    }

    /// Payload as a UTF-8 string.
    pub fn string(&self) -> Result<&'a str> {
        std::str::from_utf8(self.payload).map_err(|e| {
            IpcError::malformed(format!("tag {} is not valid UTF-8: {}", self.tag, e))
        })
    }

    /// Payload as a timestamp.
    pub fn timestamp(&self) -> Result<Timestamp> {
        Timestamp::from_bytes(self.fixed::<TIMESTAMP_LEN>()?)
    }

    /// Reader over the nested stream carried in the payload.
    pub fn nested(&self) -> TagReader<'a> {
        TagReader::new(self.payload)
    }
}

/// Cursor over an encoded tag stream.
///
/// Fields come back in write order. Every read validates the declared length
/// against the bytes left before touching the payload.
#[derive(Debug, Clone)]
pub struct TagReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TagReader<'a> {
    /// Create a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Check if the stream is exhausted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Tag and length of the next field without consuming it.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn peek(&self) -> Result<Option<FieldHeader>> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        let header = parse_header(rest)?;
        let available = rest.len() - header.header_len;
        if header.length as usize > available {
            return Err(IpcError::malformed(format!(
                "tag {} declares {} bytes, {} remaining",
                header.tag, header.length, available
            )));
        }
        Ok(Some(header))
    }

    /// Consume and return the next field.
    pub fn next_field(&mut self) -> Result<Option<Field<'a>>> {
        let Some(header) = self.peek()? else {
            return Ok(None);
        };
        let start = self.pos + header.header_len;
        let end = start + header.length as usize;
        self.pos = end;
        Ok(Some(Field {
            tag: header.tag,
            payload: &self.buf[start..end],
        }))
    }

    /// Consume the next field without interpreting it.
    ///
    /// Returns `false` at end of stream.
    pub fn skip(&mut self) -> Result<bool> {
        Ok(self.next_field()?.is_some())
    }

    /// Consume the next field, requiring it to carry `tag`.
    pub fn expect(&mut self, tag: Tag) -> Result<Field<'a>> {
        match self.next_field()? {
            Some(field) if field.tag == tag => Ok(field),
            Some(field) => Err(IpcError::malformed(format!(
                "expected tag {}, found tag {}",
                tag, field.tag
            ))),
            None => Err(IpcError::malformed(format!(
                "expected tag {}, found end of stream",
                tag
            ))),
        }
    }
}

impl<'a> Iterator for TagReader<'a> {
    type Item = Result<Field<'a>>;

    /// Yields fields until the end of stream or the first error.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_field() {
            Ok(field) => field.map(Ok),
            Err(e) => {
                // Stop after an error instead of re-reporting it forever
                self.pos = self.buf.len();
                Some(Err(e))
            }
        }
    }
}
