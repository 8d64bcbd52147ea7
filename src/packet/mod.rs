//! Length-prefixed packet framing shared by the player, room-server and
//! web listeners.
//!
//! Every frame begins with the 8 byte header `{magic: u16, type: u16,
//! length: u32}` in little-endian followed by `length` payload bytes.
//! A header whose magic word does not match resynchronizes by advancing
//! one byte; an advertised payload beyond [`MAX_PAYLOAD_SIZE`] is
//! malformed and terminal for the connection.

use bytes::{Buf, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub mod opcodes;
pub mod wire;

use self::opcodes::Opcode;
use self::wire::{WireError, WireResult};

/// Magic word opening every frame
pub const PACKET_MAGIC: u16 = 0xDEAD;
/// Wire size of the frame header
pub const HEADER_SIZE: usize = 8;
/// Largest payload a peer may advertise
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024;

/// Errors produced while framing. All of them are terminal for the
/// connection they occur on.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer advertised an oversized payload of {0} bytes")]
    Oversized(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Payload types that know how to encode themselves onto the wire and
/// decode themselves back
pub trait PacketBody: Sized {
    fn write(&self, dst: &mut BytesMut);
    fn read(src: &mut Bytes) -> WireResult<Self>;
}

/// Empty payload
impl PacketBody for () {
    fn write(&self, _dst: &mut BytesMut) {}

    fn read(_src: &mut Bytes) -> WireResult<Self> {
        Ok(())
    }
}

/// A decoded frame: raw opcode plus payload bytes.
///
/// Packets can be cloned cheaply because the contents are stored as
/// [`Bytes`], which lets room broadcasts share one payload allocation
/// across every recipient queue.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Raw opcode from the header. Kept raw so unknown opcodes survive
    /// until dispatch, where they produce `SYNTAX_ERROR`.
    pub opcode: u16,
    /// The packet payload
    pub contents: Bytes,
}

impl Packet {
    pub fn new(opcode: Opcode, contents: Bytes) -> Self {
        Self {
            opcode: opcode as u16,
            contents,
        }
    }

    /// Creates a packet with an empty payload
    pub fn empty(opcode: Opcode) -> Self {
        Self::new(opcode, Bytes::new())
    }

    /// Encodes the provided body as the payload of a new packet
    pub fn of<B: PacketBody>(opcode: Opcode, body: &B) -> Self {
        let mut contents = BytesMut::new();
        body.write(&mut contents);
        Self::new(opcode, contents.freeze())
    }

    /// Attempts to decode the payload as the provided body type
    pub fn deserialize<B: PacketBody>(&self) -> WireResult<B> {
        let mut src = self.contents.clone();
        let body = B::read(&mut src)?;
        if src.has_remaining() {
            return Err(WireError::InvalidValue("trailing bytes after body"));
        }
        Ok(body)
    }

    /// Total wire size of this packet including the header
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.contents.len()
    }
}

/// Tokio codec for encoding and decoding frames
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Error = FrameError;
    type Item = Packet;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            // Peek the magic word; on mismatch advance a single byte and
            // try again so a corrupted stream can resynchronize
            let magic = u16::from_le_bytes([src[0], src[1]]);
            if magic != PACKET_MAGIC {
                src.advance(1);
                continue;
            }

            let opcode = u16::from_le_bytes([src[2], src[3]]);
            let length = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);

            if length as usize > MAX_PAYLOAD_SIZE {
                return Err(FrameError::Oversized(length));
            }

            let total = HEADER_SIZE + length as usize;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            src.advance(HEADER_SIZE);
            let contents = src.split_to(length as usize).freeze();
            return Ok(Some(Packet { opcode, contents }));
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.wire_size());
        dst.extend_from_slice(&PACKET_MAGIC.to_le_bytes());
        dst.extend_from_slice(&item.opcode.to_le_bytes());
        dst.extend_from_slice(&(item.contents.len() as u32).to_le_bytes());
        dst.extend_from_slice(&item.contents);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(packet: Packet) -> BytesMut {
        let mut dst = BytesMut::new();
        PacketCodec.encode(packet, &mut dst).unwrap();
        dst
    }

    #[test]
    fn test_round_trip() {
        let packet = Packet::new(Opcode::RoomBroadcast, Bytes::from_static(b"hello"));
        let mut buf = encode(packet);
        let decoded = PacketCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::RoomBroadcast as u16);
        assert_eq!(&decoded.contents[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_header_waits() {
        let mut buf = BytesMut::from(&PACKET_MAGIC.to_le_bytes()[..]);
        assert!(PacketCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut buf = BytesMut::from(&b"\x01\x02\x03"[..]);
        buf.extend_from_slice(&encode(Packet::empty(Opcode::Keepalive)));
        let decoded = PacketCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::Keepalive as u16);
    }

    #[test]
    fn test_oversized_frame_is_terminal() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&PACKET_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(Opcode::Login as u16).to_le_bytes());
        buf.extend_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_le_bytes());
        assert!(matches!(
            PacketCodec.decode(&mut buf),
            Err(FrameError::Oversized(_))
        ));
    }

    #[test]
    fn test_split_payload_waits_for_rest() {
        let packet = Packet::new(Opcode::DirectedData, Bytes::from_static(b"abcdef"));
        let full = encode(packet);
        let mut buf = BytesMut::from(&full[..10]);
        assert!(PacketCodec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[10..]);
        let decoded = PacketCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded.contents[..], b"abcdef");
    }
}
