//! Escape-encoded numbers used for field tags and lengths.
//!
//! ```text
//! value < 255:   ┌────────┐
//!                │ value  │
//!                │ 1 byte │
//!                └────────┘
//! value >= 255:  ┌────────┬───────────┐
//!                │ 0xFF   │ value     │
//!                │ 1 byte │ uint32 BE │
//!                └────────┴───────────┘
//! ```

use crate::error::{IpcError, Result};

/// Marker byte announcing a 4-byte extended value.
pub const ESCAPE: u8 = 0xFF;

/// Size of an escaped number on the wire (marker + u32).
pub const ESCAPED_LEN: usize = 5;

/// Number of bytes `value` occupies once encoded.
#[inline]
pub fn encoded_len(value: u32) -> usize {
    if value < ESCAPE as u32 {
        1
    } else {
        ESCAPED_LEN
    }
}

/// Append `value` to `buf` in escape form.
///
/// # Example
///
/// ```
/// use honeypot_ipc::tagging::encode_number;
///
/// let mut buf = Vec::new();
/// encode_number(7, &mut buf);
/// encode_number(300, &mut buf);
/// assert_eq!(buf, [7, 0xFF, 0, 0, 1, 44]);
/// ```
pub fn encode_number(value: u32, buf: &mut impl Extend<u8>) {
    if value < ESCAPE as u32 {
        buf.extend([value as u8]);
    } else {
        buf.extend([ESCAPE]);
        buf.extend(value.to_be_bytes());
    }
}

/// Decode one escape-form number from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_number(buf: &[u8]) -> Result<(u32, usize)> {
    match buf.first() {
        None => Err(IpcError::malformed("missing number")),
        Some(&ESCAPE) => {
            if buf.len() < ESCAPED_LEN {
                return Err(IpcError::malformed(format!(
                    "escape marker needs 4 extension bytes, {} available",
                    buf.len() - 1
                )));
            }
            let value = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
            Ok((value, ESCAPED_LEN))
        }
        Some(&value) => Ok((value as u32, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_number(value, &mut buf);
        buf
    }

    #[test]
    fn test_small_values_are_one_byte() {
        assert_eq!(encode(0), [0]);
        assert_eq!(encode(1), [1]);
        assert_eq!(encode(254), [254]);
        assert_eq!(encoded_len(254), 1);
    }

    #[test]
    fn test_boundary_255_is_escaped() {
        // 255 itself is the marker, so it can never be a plain byte
        assert_eq!(encode(255), [0xFF, 0, 0, 0, 0xFF]);
        assert_eq!(encoded_len(255), 5);
    }

    #[test]
    fn test_extended_value_big_endian() {
        assert_eq!(encode(0x0102_0304), [0xFF, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(encode(u32::MAX), [0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_consumed_counts() {
        assert_eq!(decode_number(&[42, 9, 9]).unwrap(), (42, 1));
        assert_eq!(decode_number(&[0xFF, 0, 0, 1, 0, 9]).unwrap(), (256, 5));
        assert_eq!(decode_number(&[254]).unwrap(), (254, 1));
    }

    #[test]
    fn test_decode_empty_rejected() {
        assert!(matches!(
            decode_number(&[]),
            Err(IpcError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_decode_truncated_escape_rejected() {
        for len in 1..ESCAPED_LEN {
            let buf = &[0xFF, 0, 0, 1][..len];
            let err = decode_number(buf).unwrap_err();
            assert!(err.to_string().contains("escape marker"), "len {}", len);
        }
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        for value in [0, 1, 200, 254, 255, 256, 65_535, 1 << 24, u32::MAX] {
            assert_eq!(encode(value).len(), encoded_len(value), "value {}", value);
            assert_eq!(decode_number(&encode(value)).unwrap(), (value, encoded_len(value)));
        }
    }
}
