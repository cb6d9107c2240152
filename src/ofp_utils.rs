use std::io::{BufRead, Cursor};

use byteorder::{ReadBytesExt, WriteBytesExt};
use bytes::Buf;

use crate::ofp_message::OfpSerializationError;

pub fn write_padding_bytes(bytes: &mut Vec<u8>, count: usize) {
    for _ in 0..count {
        bytes.write_u8(0).unwrap();
    }
}

/// Read a NUL-padded fixed-width string field, consuming exactly
/// `max_capacity` bytes from the cursor.
pub fn read_fixed_size_string(
    bytes: &mut Cursor<Vec<u8>>,
    max_capacity: usize,
) -> Result<String, OfpSerializationError> {
    if bytes.remaining() < max_capacity {
        return Err(OfpSerializationError::BadLength {
            message: "fixed-size string".to_string(),
        });
    }
    let mut arr = Vec::with_capacity(max_capacity);
    let mut read_count: usize = 0;
    for _ in 0..max_capacity {
        read_count += 1;
        let next_char = bytes.read_u8().unwrap();
        if next_char == 0 {
            break;
        }
        arr.push(next_char);
    }
    bytes.consume(max_capacity - read_count);
    String::from_utf8(arr).map_err(|_| OfpSerializationError::UnexpectedValueError {
        value: "non-utf8 bytes".to_string(),
        field: "string".to_string(),
        message: "fixed-size string".to_string(),
    })
}

/// Write `s` into a fixed-width field, NUL-padded; over-long strings are
/// silently truncated.
pub fn write_fixed_size_string(bytes: &mut Vec<u8>, s: &str, width: usize) {
    let raw = s.as_bytes();
    let n = raw.len().min(width);
    bytes.extend_from_slice(&raw[..n]);
    write_padding_bytes(bytes, width - n);
}

/// Truncate `s` to at most `width` bytes on a char boundary.
pub fn truncate_string(s: &str, width: usize) -> String {
    let mut end = s.len().min(width);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
