//! Room and chat packet bodies.

use crate::packet::wire::{self, WireResult};
use crate::packet::PacketBody;
use crate::services::rooms::{RoomMember, RoomTemplate};
use bytes::{Bytes, BytesMut};

use super::MAXIMUM_PLAYER_NAME_LENGTH;

/// One entry of the ROOM_LIST packet
#[derive(Debug, Clone, PartialEq)]
pub struct RoomListEntry {
    pub room_id: u16,
    pub supported_game_flags: u32,
    pub ranked: bool,
    pub tournament: bool,
    pub country_code: u16,
    pub min_caste: u8,
    pub max_caste: u8,
    pub player_count: u16,
}

impl RoomListEntry {
    pub fn of(template: &RoomTemplate, player_count: u16) -> RoomListEntry {
        RoomListEntry {
            room_id: template.room_id,
            supported_game_flags: template.supported_game_flags.bits(),
            ranked: template.ranked,
            tournament: template.tournament,
            country_code: template.country_code,
            min_caste: template.min_caste as u8,
            max_caste: template.max_caste as u8,
            player_count,
        }
    }
}

/// ROOM_LIST body: every configured room
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomList {
    pub rooms: Vec<RoomListEntry>,
}

impl PacketBody for RoomList {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u16(dst, self.rooms.len() as u16);
        for room in &self.rooms {
            wire::write_u16(dst, room.room_id);
            wire::write_u32(dst, room.supported_game_flags);
            wire::write_bool(dst, room.ranked);
            wire::write_bool(dst, room.tournament);
            wire::write_u16(dst, room.country_code);
            wire::write_u8(dst, room.min_caste);
            wire::write_u8(dst, room.max_caste);
            wire::write_u16(dst, room.player_count);
        }
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let count = wire::read_u16(src)?;
        let mut rooms = Vec::with_capacity(count as usize);
        for _ in 0..count {
            rooms.push(RoomListEntry {
                room_id: wire::read_u16(src)?,
                supported_game_flags: wire::read_u32(src)?,
                ranked: wire::read_bool(src)?,
                tournament: wire::read_bool(src)?,
                country_code: wire::read_u16(src)?,
                min_caste: wire::read_u8(src)?,
                max_caste: wire::read_u8(src)?,
                player_count: wire::read_u16(src)?,
            });
        }
        Ok(RoomList { rooms })
    }
}

/// Client request to enter a room
#[derive(Debug, Clone, PartialEq)]
pub struct RoomLoginRequest {
    pub room_id: u16,
}

impl PacketBody for RoomLoginRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u16(dst, self.room_id);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(RoomLoginRequest {
            room_id: wire::read_u16(src)?,
        })
    }
}

/// ROOM_LOGIN_SUCCESSFUL body acknowledging the admitted room
#[derive(Debug, Clone, PartialEq)]
pub struct RoomWelcome {
    pub room_id: u16,
}

impl PacketBody for RoomWelcome {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u16(dst, self.room_id);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(RoomWelcome {
            room_id: wire::read_u16(src)?,
        })
    }
}

/// Kind of player-list update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerListAction {
    Full = 0,
    Add = 1,
    Remove = 2,
}

/// One player entry inside a PLAYER_LIST packet
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerListEntry {
    pub user_id: u32,
    pub caste: u8,
    /// Displayed points, already floored at zero
    pub points: u32,
    pub display_name: String,
}

impl PlayerListEntry {
    pub fn of(member: &RoomMember) -> PlayerListEntry {
        PlayerListEntry {
            user_id: member.user_id,
            caste: member.caste as u8,
            points: member.points,
            display_name: member.display_name.clone(),
        }
    }
}

/// PLAYER_LIST body: a full roster or a join/leave delta
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerList {
    pub action: PlayerListAction,
    pub players: Vec<PlayerListEntry>,
}

impl PacketBody for PlayerList {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u8(dst, self.action as u8);
        wire::write_u16(dst, self.players.len() as u16);
        for player in &self.players {
            wire::write_u32(dst, player.user_id);
            wire::write_u8(dst, player.caste);
            wire::write_u32(dst, player.points);
            wire::write_string(dst, &player.display_name, MAXIMUM_PLAYER_NAME_LENGTH);
        }
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let action = match wire::read_u8(src)? {
            0 => PlayerListAction::Full,
            1 => PlayerListAction::Add,
            2 => PlayerListAction::Remove,
            _ => return Err(wire::WireError::InvalidValue("player list action")),
        };
        let count = wire::read_u16(src)?;
        let mut players = Vec::with_capacity(count as usize);
        for _ in 0..count {
            players.push(PlayerListEntry {
                user_id: wire::read_u32(src)?,
                caste: wire::read_u8(src)?,
                points: wire::read_u32(src)?,
                display_name: wire::read_string(src)?,
            });
        }
        Ok(PlayerList { action, players })
    }
}

/// ROOM_BROADCAST body. The payload is opaque application data the
/// server routes without interpreting.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomBroadcast {
    /// Filled in by the server before fan-out
    pub sender: u32,
    pub data: Bytes,
}

impl PacketBody for RoomBroadcast {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.sender);
        wire::write_bytes(dst, &self.data);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let sender = wire::read_u32(src)?;
        let data = src.split_to(src.len());
        Ok(RoomBroadcast { sender, data })
    }
}

/// DIRECTED_DATA body: one named recipient in the sender's room
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedData {
    pub sender: u32,
    pub recipient_name: String,
    pub data: Bytes,
}

impl PacketBody for DirectedData {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.sender);
        wire::write_string(dst, &self.recipient_name, MAXIMUM_PLAYER_NAME_LENGTH);
        wire::write_bytes(dst, &self.data);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let sender = wire::read_u32(src)?;
        let recipient_name = wire::read_string(src)?;
        let data = src.split_to(src.len());
        Ok(DirectedData {
            sender,
            recipient_name,
            data,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{opcodes::Opcode, Packet};

    #[test]
    fn test_player_list_round_trip() {
        let body = PlayerList {
            action: PlayerListAction::Add,
            players: vec![PlayerListEntry {
                user_id: 7,
                caste: 3,
                points: 12,
                display_name: "alice".to_string(),
            }],
        };
        let packet = Packet::of(Opcode::PlayerList, &body);
        let decoded: PlayerList = packet.deserialize().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_broadcast_carries_opaque_payload() {
        let body = RoomBroadcast {
            sender: 9,
            data: Bytes::from_static(b"\x01hello room\xff"),
        };
        let packet = Packet::of(Opcode::RoomBroadcast, &body);
        let decoded: RoomBroadcast = packet.deserialize().unwrap();
        assert_eq!(decoded, body);
    }
}
