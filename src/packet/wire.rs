//! Little-endian field readers and writers shared by every packet body.
//!
//! All multi-byte fields on the wire are little-endian. Strings are
//! encoded as a u16 byte length followed by UTF-8 bytes and are trimmed
//! to their declared maximum at encode time, so decode(encode(p)) = p
//! modulo that trimming.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while decoding a packet body
#[derive(Debug, Error)]
pub enum WireError {
    /// Body ended before the field could be read
    #[error("unexpected end of packet body")]
    UnexpectedEnd,
    /// A string field contained invalid UTF-8
    #[error("string field was not valid UTF-8")]
    InvalidString,
    /// A field carried a value outside its legal range
    #[error("invalid value for field: {0}")]
    InvalidValue(&'static str),
}

pub type WireResult<T> = Result<T, WireError>;

pub fn read_u8(src: &mut Bytes) -> WireResult<u8> {
    if src.remaining() < 1 {
        return Err(WireError::UnexpectedEnd);
    }
    Ok(src.get_u8())
}

pub fn read_u16(src: &mut Bytes) -> WireResult<u16> {
    if src.remaining() < 2 {
        return Err(WireError::UnexpectedEnd);
    }
    Ok(src.get_u16_le())
}

pub fn read_u32(src: &mut Bytes) -> WireResult<u32> {
    if src.remaining() < 4 {
        return Err(WireError::UnexpectedEnd);
    }
    Ok(src.get_u32_le())
}

pub fn read_i32(src: &mut Bytes) -> WireResult<i32> {
    if src.remaining() < 4 {
        return Err(WireError::UnexpectedEnd);
    }
    Ok(src.get_i32_le())
}

pub fn read_bool(src: &mut Bytes) -> WireResult<bool> {
    Ok(read_u8(src)? != 0)
}

/// Reads an exact run of bytes, used for fixed-size fields such as
/// authentication tokens
pub fn read_bytes(src: &mut Bytes, length: usize) -> WireResult<Bytes> {
    if src.remaining() < length {
        return Err(WireError::UnexpectedEnd);
    }
    Ok(src.split_to(length))
}

/// Reads a length-prefixed UTF-8 string
pub fn read_string(src: &mut Bytes) -> WireResult<String> {
    let length = read_u16(src)? as usize;
    let raw = read_bytes(src, length)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidString)
}

pub fn write_u8(dst: &mut BytesMut, value: u8) {
    dst.put_u8(value);
}

pub fn write_u16(dst: &mut BytesMut, value: u16) {
    dst.put_u16_le(value);
}

pub fn write_u32(dst: &mut BytesMut, value: u32) {
    dst.put_u32_le(value);
}

pub fn write_i32(dst: &mut BytesMut, value: i32) {
    dst.put_i32_le(value);
}

pub fn write_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(value as u8);
}

pub fn write_bytes(dst: &mut BytesMut, value: &[u8]) {
    dst.extend_from_slice(value);
}

/// Writes a length-prefixed UTF-8 string trimmed to `max` bytes on a
/// character boundary
pub fn write_string(dst: &mut BytesMut, value: &str, max: usize) {
    let mut end = value.len().min(max);
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    let raw = &value.as_bytes()[..end];
    dst.put_u16_le(raw.len() as u16);
    dst.extend_from_slice(raw);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut dst = BytesMut::new();
        write_string(&mut dst, "alice", 32);
        let mut src = dst.freeze();
        assert_eq!(read_string(&mut src).unwrap(), "alice");
    }

    #[test]
    fn test_string_trimmed_to_maximum() {
        let mut dst = BytesMut::new();
        write_string(&mut dst, "overlong-name", 8);
        let mut src = dst.freeze();
        assert_eq!(read_string(&mut src).unwrap(), "overlong");
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut src = Bytes::from_static(&[0x01]);
        assert!(matches!(read_u32(&mut src), Err(WireError::UnexpectedEnd)));
    }
}
