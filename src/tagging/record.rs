//! Connection record codec.
//!
//! A record is a flat tag stream with these fields:
//!
//! | Tag | Name             | Payload                    | Emitted            |
//! |-----|------------------|----------------------------|--------------------|
//! | 1   | `START_TIME`     | timestamp (12 bytes)       | if set             |
//! | 2   | `END_TIME`       | timestamp (12 bytes)       | if set             |
//! | 3   | `SRC_ADDR`       | nested address stream      | always             |
//! | 4   | `DST_ADDR`       | nested address stream      | always             |
//! | 5   | `SRC_PORT`       | u16 BE                     | always             |
//! | 6   | `DST_PORT`       | u16 BE                     | always             |
//! | 7   | `PROTO`          | u8                         | always             |
//! | 8   | `STATE`          | u8                         | always             |
//! | 9   | `OS_FINGERPRINT` | UTF-8 string               | if present         |
//! | 10  | `HASH_DIGEST`    | 20-byte digest, repeatable | once per digest    |
//! | 11  | `BYTE_COUNT`     | u64 BE                     | if non-zero        |
//! | 12  | `FLAGS`          | u32 BE                     | if non-zero        |
//!
//! Unknown tags are skipped on decode. A zero `bytes` or `flags` value is
//! indistinguishable from an absent one. A stream without an address field
//! decodes to [`Address::default`] for that side.

use bytes::Bytes;

use super::address::{decode_address, encode_address, Address};
use super::stream::{Tag, TagReader, TagWriter, Timestamp};
use crate::error::{IpcError, Result};

/// Record field tags.
pub mod tags {
    use super::Tag;

    /// Flow start time.
    pub const START_TIME: Tag = 1;
    /// Flow end time.
    pub const END_TIME: Tag = 2;
    /// Source address (nested).
    pub const SRC_ADDR: Tag = 3;
    /// Destination address (nested).
    pub const DST_ADDR: Tag = 4;
    /// Source port.
    pub const SRC_PORT: Tag = 5;
    /// Destination port.
    pub const DST_PORT: Tag = 6;
    /// IP protocol number.
    pub const PROTO: Tag = 7;
    /// Flow state.
    pub const STATE: Tag = 8;
    /// Passive OS fingerprint.
    pub const OS_FINGERPRINT: Tag = 9;
    /// Content digest (repeatable).
    pub const HASH_DIGEST: Tag = 10;
    /// Byte counter.
    pub const BYTE_COUNT: Tag = 11;
    /// Flag bitmask.
    pub const FLAGS: Tag = 12;
}

/// Content digest width in bytes.
pub const DIGEST_LEN: usize = 20;

/// Fixed-size content digest.
pub type Digest = [u8; DIGEST_LEN];

/// State of one observed flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// When the flow started; `None` is distinct from the epoch.
    pub start: Option<Timestamp>,
    /// When the flow ended.
    pub end: Option<Timestamp>,
    /// Source address.
    pub src: Address,
    /// Destination address.
    pub dst: Address,
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// IP protocol number.
    pub proto: u8,
    /// Flow state; meaning belongs to the caller.
    pub state: u8,
    /// Passive OS fingerprint of the remote host.
    pub os_fingerprint: Option<String>,
    /// Content digests in the order they were observed.
    pub hashes: Vec<Digest>,
    /// Bytes transferred; zero means "not recorded".
    pub bytes: u64,
    /// Flag bitmask; zero means "not recorded".
    pub flags: u32,
}

impl ConnectionRecord {
    /// Encode into a standalone tag stream.
    pub fn encode(&self) -> Bytes {
        encode_record(self)
    }

    /// Decode from a standalone tag stream.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        decode_record(buf)
    }
}

/// Encode a record as a tag stream.
///
/// # Example
///
/// ```
/// use std::net::Ipv4Addr;
/// use honeypot_ipc::tagging::{decode_record, encode_record, ConnectionRecord};
///
/// let record = ConnectionRecord {
///     src: Ipv4Addr::new(10, 0, 0, 2).into(),
///     dst: Ipv4Addr::new(10, 0, 0, 1).into(),
///     src_port: 40000,
///     dst_port: 22,
///     proto: 6,
///     ..Default::default()
/// };
/// let bytes = encode_record(&record);
/// assert_eq!(decode_record(&bytes).unwrap(), record);
/// ```
pub fn encode_record(record: &ConnectionRecord) -> Bytes {
    let mut writer = TagWriter::with_capacity(128);
    write_record(record, &mut writer);
    writer.freeze()
}

fn write_record(record: &ConnectionRecord, writer: &mut TagWriter) {
    if let Some(start) = record.start {
        writer.put_timestamp(tags::START_TIME, start);
    }
    if let Some(end) = record.end {
        writer.put_timestamp(tags::END_TIME, end);
    }

    let mut addr = TagWriter::with_capacity(32);
    for (tag, value) in [(tags::SRC_ADDR, &record.src), (tags::DST_ADDR, &record.dst)] {
        addr.clear();
        encode_address(value, &mut addr);
        writer.put_buffer(tag, &addr);
    }

    writer.put_u16(tags::SRC_PORT, record.src_port);
    writer.put_u16(tags::DST_PORT, record.dst_port);
    writer.put_u8(tags::PROTO, record.proto);
    writer.put_u8(tags::STATE, record.state);

    if let Some(fp) = &record.os_fingerprint {
        writer.put_string(tags::OS_FINGERPRINT, fp);
    }

    for digest in &record.hashes {
        writer.put_fixed(tags::HASH_DIGEST, digest);
    }

    if record.bytes != 0 {
        writer.put_u64(tags::BYTE_COUNT, record.bytes);
    }
    if record.flags != 0 {
        writer.put_u32(tags::FLAGS, record.flags);
    }
}

/// Decode a record from a tag stream.
///
/// Any structural error aborts the whole decode; nothing is defaulted.
pub fn decode_record(buf: &[u8]) -> Result<ConnectionRecord> {
    let mut reader = TagReader::new(buf);
    let mut record = ConnectionRecord::default();

    while let Some(field) = reader.next_field()? {
        match field.tag {
            tags::START_TIME => record.start = Some(field.timestamp()?),
            tags::END_TIME => record.end = Some(field.timestamp()?),
            tags::SRC_ADDR => record.src = decode_address(field.payload)?,
            tags::DST_ADDR => record.dst = decode_address(field.payload)?,
            tags::SRC_PORT => record.src_port = field.u16()?,
            tags::DST_PORT => record.dst_port = field.u16()?,
            tags::PROTO => record.proto = field.u8()?,
            tags::STATE => record.state = field.u8()?,
            tags::OS_FINGERPRINT => record.os_fingerprint = Some(field.string()?.to_owned()),
            tags::HASH_DIGEST => record.hashes.push(field.fixed()?),
            tags::BYTE_COUNT => record.bytes = field.u64()?,
            tags::FLAGS => record.flags = field.u32()?,
            // Newer writers may add fields; the length prefix lets us step over them
            _ => {}
        }
    }

    Ok(record)
}

/// Append `record` as a single field under `tag`.
pub fn marshal_record(writer: &mut TagWriter, tag: Tag, record: &ConnectionRecord) {
    let mut inner = TagWriter::with_capacity(128);
    write_record(record, &mut inner);
    writer.put_buffer(tag, &inner);
}

/// Read a record wrapped by [`marshal_record`]; the next field must carry
/// `tag`.
pub fn unmarshal_record(reader: &mut TagReader<'_>, tag: Tag) -> Result<ConnectionRecord> {
    let field = reader.expect(tag)?;
    decode_record(field.payload).map_err(|e| match e {
        IpcError::MalformedStream(msg) => {
            IpcError::malformed(format!("record under tag {}: {}", tag, msg))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn full_record() -> ConnectionRecord {
        ConnectionRecord {
            start: Some(Timestamp::new(1_100_000_000, 17)),
            end: Some(Timestamp::new(1_100_000_090, 999_999)),
            src: Ipv4Addr::new(192, 0, 2, 33).into(),
            dst: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x80).into(),
            src_port: 51234,
            dst_port: 80,
            proto: 6,
            state: 3,
            os_fingerprint: Some("Windows XP SP1".to_string()),
            hashes: vec![[1; DIGEST_LEN], [2; DIGEST_LEN]],
            bytes: 4096,
            flags: 0x11,
        }
    }

    fn tags_of(buf: &[u8]) -> Vec<Tag> {
        TagReader::new(buf).map(|f| f.unwrap().tag).collect()
    }

    #[test]
    fn test_full_record_round_trip() {
        let record = full_record();
        assert_eq!(decode_record(&encode_record(&record)).unwrap(), record);
    }

    #[test]
    fn test_emission_order() {
        assert_eq!(
            tags_of(&encode_record(&full_record())),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 10, 11, 12]
        );
    }

    #[test]
    fn test_default_record_emits_only_mandatory_fields() {
        let bytes = encode_record(&ConnectionRecord::default());
        assert_eq!(
            tags_of(&bytes),
            vec![
                tags::SRC_ADDR,
                tags::DST_ADDR,
                tags::SRC_PORT,
                tags::DST_PORT,
                tags::PROTO,
                tags::STATE
            ]
        );
        assert_eq!(decode_record(&bytes).unwrap(), ConnectionRecord::default());
    }

    #[test]
    fn test_default_record_carries_unspecified_addresses() {
        let bytes = encode_record(&ConnectionRecord::default());
        let mut reader = TagReader::new(&bytes);
        for tag in [tags::SRC_ADDR, tags::DST_ADDR] {
            let field = reader.expect(tag).unwrap();
            assert_eq!(decode_address(field.payload).unwrap(), Address::default());
        }
    }

    #[test]
    fn test_missing_addresses_decode_to_default() {
        let mut writer = TagWriter::new();
        writer.put_u16(tags::DST_PORT, 25);
        let record = decode_record(writer.as_slice()).unwrap();
        assert_eq!(record.src, Address::default());
        assert_eq!(record.dst, Address::default());
        assert_eq!(record.dst_port, 25);
    }

    #[test]
    fn test_epoch_start_is_not_absent() {
        let record = ConnectionRecord {
            start: Some(Timestamp::default()),
            ..Default::default()
        };
        let bytes = encode_record(&record);
        assert_eq!(tags_of(&bytes)[0], tags::START_TIME);
        assert_eq!(decode_record(&bytes).unwrap().start, Some(Timestamp::default()));
    }

    #[test]
    fn test_unnormalised_start_round_trips() {
        let record = ConnectionRecord {
            start: Some(Timestamp::new(1, 1_500_000)),
            ..Default::default()
        };
        let decoded = decode_record(&encode_record(&record)).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.start, Some(Timestamp::new(2, 500_000)));
    }

    #[test]
    fn test_zero_counters_omitted() {
        let mut record = full_record();
        record.bytes = 0;
        record.flags = 0;
        let found = tags_of(&encode_record(&record));
        assert!(!found.contains(&tags::BYTE_COUNT));
        assert!(!found.contains(&tags::FLAGS));
    }

    #[test]
    fn test_short_hash_rejected() {
        let mut writer = TagWriter::new();
        writer.put_fixed(tags::HASH_DIGEST, &[0; 16]);
        let err = decode_record(writer.as_slice()).unwrap_err();
        assert!(err.to_string().contains("expected 20 bytes, got 16"));
    }

    #[test]
    fn test_bad_nested_address_aborts_record() {
        let mut addr = TagWriter::new();
        addr.put_u8(1, 2);
        addr.put_u8(2, 32);
        addr.put_fixed(3, &[1, 2, 3]);

        let mut writer = TagWriter::new();
        writer.put_u16(tags::SRC_PORT, 1);
        writer.put_buffer(tags::SRC_ADDR, &addr);
        assert!(matches!(
            decode_record(writer.as_slice()),
            Err(IpcError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_last_scalar_wins_on_repeat() {
        let mut writer = TagWriter::new();
        writer.put_u16(tags::DST_PORT, 21);
        writer.put_u16(tags::DST_PORT, 23);
        assert_eq!(decode_record(writer.as_slice()).unwrap().dst_port, 23);
    }

    #[test]
    fn test_marshal_under_outer_tag() {
        let record = full_record();
        let mut writer = TagWriter::new();
        marshal_record(&mut writer, 40, &record);
        marshal_record(&mut writer, 40, &ConnectionRecord::default());

        let mut reader = TagReader::new(writer.as_slice());
        assert_eq!(unmarshal_record(&mut reader, 40).unwrap(), record);
        assert_eq!(
            unmarshal_record(&mut reader, 40).unwrap(),
            ConnectionRecord::default()
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn test_unmarshal_wrong_outer_tag() {
        let mut writer = TagWriter::new();
        marshal_record(&mut writer, 40, &full_record());
        let mut reader = TagReader::new(writer.as_slice());
        assert!(unmarshal_record(&mut reader, 41).is_err());
    }

    #[test]
    fn test_unmarshal_reports_outer_tag() {
        let mut inner = TagWriter::new();
        inner.put_u8(tags::SRC_PORT, 1);
        let mut writer = TagWriter::new();
        writer.put_buffer(40, &inner);

        let mut reader = TagReader::new(writer.as_slice());
        let err = unmarshal_record(&mut reader, 40).unwrap_err();
        assert!(err.to_string().contains("record under tag 40"));
    }
}
