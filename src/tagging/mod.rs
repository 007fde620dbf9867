//! Tagging module - self-describing tag stream encoding.
//!
//! This module implements the binary record format:
//! - escape-encoded tag and length numbers
//! - `TagWriter` / `TagReader` for appending and reading fields
//! - `FieldBuffer` for accumulating partial reads of top-level fields
//! - address and connection record codecs built on top

mod address;
mod field_buffer;
mod record;
mod stream;
mod varint;

pub use address::{
    decode_address, encode_address, kind, Address, ADDR_BITS, ADDR_PAYLOAD, ADDR_TYPE,
    ETH_ADDR_LEN, IPV4_ADDR_LEN, IPV6_ADDR_LEN,
};
pub use field_buffer::{FieldBuffer, OwnedField, DEFAULT_MAX_FIELD_LEN};
pub use record::{
    decode_record, encode_record, marshal_record, tags, unmarshal_record, ConnectionRecord,
    Digest, DIGEST_LEN,
};
pub use stream::{
    Field, FieldHeader, Tag, TagReader, TagWriter, Timestamp, RESERVED_TAG, TIMESTAMP_LEN,
};
pub use varint::{decode_number, encode_number, encoded_len, ESCAPE, ESCAPED_LEN};
