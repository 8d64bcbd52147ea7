//! Helpers for the fixed-size record form used by the user and order
//! databases.
//!
//! Both databases are flat files: a header of `{record_count: u32,
//! reserved: [u32; 40]}` followed by fixed-size records. A signature
//! word opens every record and distinguishes live records from
//! tombstones. Strings inside records occupy fixed fields written as a
//! length byte followed by the bytes and zero padding, so a record
//! always serializes to exactly its declared size.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the database file header on disk
pub const DB_HEADER_SIZE: usize = 4 + 40 * 4;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record truncated")]
    Truncated,
    #[error("bad record signature {0:#010x}")]
    BadSignature(u32),
    #[error("string field held invalid UTF-8")]
    InvalidString,
    #[error("field value out of range: {0}")]
    OutOfRange(&'static str),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Encodes the database file header
pub fn write_db_header(dst: &mut BytesMut, record_count: u32) {
    dst.put_u32_le(record_count);
    for _ in 0..40 {
        dst.put_u32_le(0);
    }
}

/// Decodes the database file header returning the record count
pub fn read_db_header(src: &mut Bytes) -> RecordResult<u32> {
    if src.remaining() < DB_HEADER_SIZE {
        return Err(RecordError::Truncated);
    }
    let count = src.get_u32_le();
    src.advance(40 * 4);
    Ok(count)
}

pub fn read_u8(src: &mut Bytes) -> RecordResult<u8> {
    if src.remaining() < 1 {
        return Err(RecordError::Truncated);
    }
    Ok(src.get_u8())
}

pub fn read_u16(src: &mut Bytes) -> RecordResult<u16> {
    if src.remaining() < 2 {
        return Err(RecordError::Truncated);
    }
    Ok(src.get_u16_le())
}

pub fn read_u32(src: &mut Bytes) -> RecordResult<u32> {
    if src.remaining() < 4 {
        return Err(RecordError::Truncated);
    }
    Ok(src.get_u32_le())
}

pub fn read_i32(src: &mut Bytes) -> RecordResult<i32> {
    if src.remaining() < 4 {
        return Err(RecordError::Truncated);
    }
    Ok(src.get_i32_le())
}

pub fn read_i64(src: &mut Bytes) -> RecordResult<i64> {
    if src.remaining() < 8 {
        return Err(RecordError::Truncated);
    }
    Ok(src.get_i64_le())
}

/// Writes a string into a fixed field of `capacity` bytes: one length
/// byte, the string bytes, zero padding
pub fn write_fixed_string(dst: &mut BytesMut, value: &str, capacity: usize) {
    debug_assert!(capacity <= u8::MAX as usize);
    let mut end = value.len().min(capacity);
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    let raw = &value.as_bytes()[..end];
    dst.put_u8(raw.len() as u8);
    dst.extend_from_slice(raw);
    dst.extend_from_slice(&vec![0u8; capacity - raw.len()]);
}

/// Reads a string from a fixed field of `capacity` bytes
pub fn read_fixed_string(src: &mut Bytes, capacity: usize) -> RecordResult<String> {
    if src.remaining() < capacity + 1 {
        return Err(RecordError::Truncated);
    }
    let length = src.get_u8() as usize;
    if length > capacity {
        return Err(RecordError::OutOfRange("string length"));
    }
    let field = src.split_to(capacity);
    String::from_utf8(field[..length].to_vec()).map_err(|_| RecordError::InvalidString)
}

/// Writes raw bytes into a fixed field of `capacity` bytes with a
/// length byte prefix
pub fn write_fixed_bytes(dst: &mut BytesMut, value: &[u8], capacity: usize) {
    debug_assert!(capacity <= u8::MAX as usize);
    let raw = &value[..value.len().min(capacity)];
    dst.put_u8(raw.len() as u8);
    dst.extend_from_slice(raw);
    dst.extend_from_slice(&vec![0u8; capacity - raw.len()]);
}

/// Reads raw bytes from a fixed field of `capacity` bytes
pub fn read_fixed_bytes(src: &mut Bytes, capacity: usize) -> RecordResult<Vec<u8>> {
    if src.remaining() < capacity + 1 {
        return Err(RecordError::Truncated);
    }
    let length = src.get_u8() as usize;
    if length > capacity {
        return Err(RecordError::OutOfRange("byte field length"));
    }
    let field = src.split_to(capacity);
    Ok(field[..length].to_vec())
}

/// Zero padding out to a record boundary
pub fn write_padding(dst: &mut BytesMut, target_size: usize) {
    debug_assert!(dst.len() <= target_size, "record exceeded its declared size");
    dst.extend_from_slice(&vec![0u8; target_size - dst.len()]);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixed_string_round_trip() {
        let mut dst = BytesMut::new();
        write_fixed_string(&mut dst, "alice", 15);
        assert_eq!(dst.len(), 16);
        let mut src = dst.freeze();
        assert_eq!(read_fixed_string(&mut src, 15).unwrap(), "alice");
    }

    #[test]
    fn test_header_round_trip() {
        let mut dst = BytesMut::new();
        write_db_header(&mut dst, 42);
        assert_eq!(dst.len(), DB_HEADER_SIZE);
        let mut src = dst.freeze();
        assert_eq!(read_db_header(&mut src).unwrap(), 42);
    }
}
