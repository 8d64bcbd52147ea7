//! Game-search packet bodies.

use crate::packet::wire::{self, WireResult};
use crate::packet::PacketBody;
use crate::services::game::search::GameQuery;
use bytes::{Bytes, BytesMut};

use super::{MAXIMUM_GAME_NAME_LENGTH, MAXIMUM_MAP_NAME_LENGTH};

/// GAME_SEARCH_QUERY body. Every predicate is optional: a presence
/// byte precedes each fixed-width field, and empty strings mean no
/// name filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameSearchRequest {
    pub game_type: Option<u16>,
    pub scoring_mode: Option<u16>,
    pub unit_trading: Option<bool>,
    pub veterans: Option<bool>,
    pub teams: Option<bool>,
    pub alliances: Option<bool>,
    pub enemy_visibility: Option<bool>,
    pub game_name: String,
    pub map_name: String,
}

impl GameSearchRequest {
    pub fn into_query(self) -> GameQuery {
        GameQuery {
            game_type: self.game_type,
            scoring_mode: self.scoring_mode,
            unit_trading: self.unit_trading,
            veterans: self.veterans,
            teams: self.teams,
            alliances: self.alliances,
            enemy_visibility: self.enemy_visibility,
            game_name: (!self.game_name.is_empty()).then_some(self.game_name),
            map_name: (!self.map_name.is_empty()).then_some(self.map_name),
        }
    }
}

fn write_opt_u16(dst: &mut BytesMut, value: Option<u16>) {
    wire::write_bool(dst, value.is_some());
    wire::write_u16(dst, value.unwrap_or(0));
}

fn read_opt_u16(src: &mut Bytes) -> WireResult<Option<u16>> {
    let present = wire::read_bool(src)?;
    let value = wire::read_u16(src)?;
    Ok(present.then_some(value))
}

fn write_opt_bool(dst: &mut BytesMut, value: Option<bool>) {
    wire::write_bool(dst, value.is_some());
    wire::write_bool(dst, value.unwrap_or(false));
}

fn read_opt_bool(src: &mut Bytes) -> WireResult<Option<bool>> {
    let present = wire::read_bool(src)?;
    let value = wire::read_bool(src)?;
    Ok(present.then_some(value))
}

impl PacketBody for GameSearchRequest {
    fn write(&self, dst: &mut BytesMut) {
        write_opt_u16(dst, self.game_type);
        write_opt_u16(dst, self.scoring_mode);
        write_opt_bool(dst, self.unit_trading);
        write_opt_bool(dst, self.veterans);
        write_opt_bool(dst, self.teams);
        write_opt_bool(dst, self.alliances);
        write_opt_bool(dst, self.enemy_visibility);
        wire::write_string(dst, &self.game_name, MAXIMUM_GAME_NAME_LENGTH);
        wire::write_string(dst, &self.map_name, MAXIMUM_MAP_NAME_LENGTH);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(GameSearchRequest {
            game_type: read_opt_u16(src)?,
            scoring_mode: read_opt_u16(src)?,
            unit_trading: read_opt_bool(src)?,
            veterans: read_opt_bool(src)?,
            teams: read_opt_bool(src)?,
            alliances: read_opt_bool(src)?,
            enemy_visibility: read_opt_bool(src)?,
            game_name: wire::read_string(src)?,
            map_name: wire::read_string(src)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{opcodes::Opcode, Packet};

    #[test]
    fn test_search_round_trip() {
        let body = GameSearchRequest {
            game_type: Some(3),
            unit_trading: Some(true),
            game_name: "bloodbath".to_string(),
            ..Default::default()
        };
        let packet = Packet::of(Opcode::GameSearchQuery, &body);
        let decoded: GameSearchRequest = packet.deserialize().unwrap();
        assert_eq!(decoded, body);

        let query = decoded.into_query();
        assert_eq!(query.game_type, Some(3));
        assert_eq!(query.scoring_mode, None);
        assert_eq!(query.game_name.as_deref(), Some("bloodbath"));
        assert_eq!(query.map_name, None);
    }
}
