//! Game lifecycle packet bodies.

use crate::packet::wire::{self, WireResult};
use crate::packet::PacketBody;
use crate::services::game::standings::{PlayerStanding, StandingsReport, TeamStanding};
use crate::services::game::{GameOptions, GameSettings, GameSnapshot, GameState};
use bytes::{Bytes, BytesMut};

use super::{MAXIMUM_GAME_NAME_LENGTH, MAXIMUM_MAP_NAME_LENGTH, MAXIMUM_PASSWORD_LENGTH};

/// Host request to create a new game
#[derive(Debug, Clone, PartialEq)]
pub struct CreateGameRequest {
    pub name: String,
    pub map_name: String,
    pub game_type: u16,
    pub scoring_mode: u16,
    pub max_players: u16,
    pub team_game: bool,
    pub ranked: bool,
    pub options: u32,
    /// Empty for open games
    pub password: String,
}

impl CreateGameRequest {
    /// Converts the request into coordinator settings. Private games
    /// store the password hashed like any other credential.
    pub fn into_settings(self, password_hash: Option<String>) -> GameSettings {
        GameSettings {
            name: self.name,
            map_name: self.map_name,
            game_type: self.game_type,
            scoring_mode: self.scoring_mode,
            max_players: self.max_players,
            team_game: self.team_game,
            options: GameOptions::from_bits_truncate(self.options),
            password_hash,
            ranked: self.ranked,
        }
    }
}

impl PacketBody for CreateGameRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_string(dst, &self.name, MAXIMUM_GAME_NAME_LENGTH);
        wire::write_string(dst, &self.map_name, MAXIMUM_MAP_NAME_LENGTH);
        wire::write_u16(dst, self.game_type);
        wire::write_u16(dst, self.scoring_mode);
        wire::write_u16(dst, self.max_players);
        wire::write_bool(dst, self.team_game);
        wire::write_bool(dst, self.ranked);
        wire::write_u32(dst, self.options);
        wire::write_string(dst, &self.password, MAXIMUM_PASSWORD_LENGTH);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(CreateGameRequest {
            name: wire::read_string(src)?,
            map_name: wire::read_string(src)?,
            game_type: wire::read_u16(src)?,
            scoring_mode: wire::read_u16(src)?,
            max_players: wire::read_u16(src)?,
            team_game: wire::read_bool(src)?,
            ranked: wire::read_bool(src)?,
            options: wire::read_u32(src)?,
            password: wire::read_string(src)?,
        })
    }
}

/// Requests that address a game by id share one body shape
macro_rules! game_id_body {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub game_id: u32,
        }

        impl PacketBody for $name {
            fn write(&self, dst: &mut BytesMut) {
                wire::write_u32(dst, self.game_id);
            }

            fn read(src: &mut Bytes) -> WireResult<Self> {
                Ok($name {
                    game_id: wire::read_u32(src)?,
                })
            }
        }
    };
}

game_id_body!(LeaveGameRequest);
game_id_body!(StartGameRequest);
game_id_body!(EndGameRequest);
game_id_body!(RemoveGameRequest);

/// Join request; the password is only consulted for private games
#[derive(Debug, Clone, PartialEq)]
pub struct JoinGameRequest {
    pub game_id: u32,
    pub password: String,
}

impl PacketBody for JoinGameRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.game_id);
        wire::write_string(dst, &self.password, MAXIMUM_PASSWORD_LENGTH);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(JoinGameRequest {
            game_id: wire::read_u32(src)?,
            password: wire::read_string(src)?,
        })
    }
}

/// Ready-flag update for the sender's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetReadyRequest {
    pub game_id: u32,
    pub ready: bool,
}

impl PacketBody for SetReadyRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.game_id);
        wire::write_bool(dst, self.ready);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(SetReadyRequest {
            game_id: wire::read_u32(src)?,
            ready: wire::read_bool(src)?,
        })
    }
}

/// Team assignment for the sender's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTeamRequest {
    pub game_id: u32,
    pub team: u16,
}

impl PacketBody for SetTeamRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.game_id);
        wire::write_u16(dst, self.team);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(SetTeamRequest {
            game_id: wire::read_u32(src)?,
            team: wire::read_u16(src)?,
        })
    }
}

/// One entry of a GAME_LIST packet
#[derive(Debug, Clone, PartialEq)]
pub struct GameListEntry {
    pub game_id: u32,
    pub host: u32,
    pub state: u8,
    pub name: String,
    pub map_name: String,
    pub player_count: u16,
    pub max_players: u16,
}

impl GameListEntry {
    pub fn of(snapshot: &GameSnapshot) -> GameListEntry {
        GameListEntry {
            game_id: snapshot.id,
            host: snapshot.host,
            state: match snapshot.state {
                GameState::Initializing => 0,
                GameState::Waiting => 1,
                GameState::Starting => 2,
                GameState::InProgress => 3,
                GameState::Ending => 4,
                GameState::Completed => 5,
                GameState::Aborted => 6,
            },
            name: snapshot.name.clone(),
            map_name: snapshot.map_name.clone(),
            player_count: snapshot.player_count,
            max_players: snapshot.max_players,
        }
    }
}

/// GAME_LIST body: games advertised in the recipient's room, or a
/// search result set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameList {
    pub games: Vec<GameListEntry>,
}

impl PacketBody for GameList {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u16(dst, self.games.len() as u16);
        for game in &self.games {
            wire::write_u32(dst, game.game_id);
            wire::write_u32(dst, game.host);
            wire::write_u8(dst, game.state);
            wire::write_string(dst, &game.name, MAXIMUM_GAME_NAME_LENGTH);
            wire::write_string(dst, &game.map_name, MAXIMUM_MAP_NAME_LENGTH);
            wire::write_u16(dst, game.player_count);
            wire::write_u16(dst, game.max_players);
        }
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let count = wire::read_u16(src)?;
        let mut games = Vec::with_capacity(count as usize);
        for _ in 0..count {
            games.push(GameListEntry {
                game_id: wire::read_u32(src)?,
                host: wire::read_u32(src)?,
                state: wire::read_u8(src)?,
                name: wire::read_string(src)?,
                map_name: wire::read_string(src)?,
                player_count: wire::read_u16(src)?,
                max_players: wire::read_u16(src)?,
            });
        }
        Ok(GameList { games })
    }
}

/// GAME_SCORE body: one client's claim of the final standings
#[derive(Debug, Clone, PartialEq)]
pub struct GameScoreReport {
    pub game_id: u32,
    pub game_ended_code: u16,
    pub version: u16,
    pub game_scoring: u16,
    pub players: Vec<PlayerStandingEntry>,
    pub team_places: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStandingEntry {
    pub user_id: u32,
    pub team: u16,
    pub points_killed: i32,
    pub points_lost: i32,
}

impl GameScoreReport {
    pub fn into_standings(self) -> StandingsReport {
        StandingsReport {
            game_ended_code: self.game_ended_code,
            version: self.version,
            number_of_players: self.players.len() as u16,
            game_scoring: self.game_scoring,
            players: self
                .players
                .into_iter()
                .map(|entry| PlayerStanding {
                    user_id: entry.user_id,
                    team: entry.team,
                    points_killed: entry.points_killed,
                    points_lost: entry.points_lost,
                })
                .collect(),
            teams: self
                .team_places
                .into_iter()
                .map(|place| TeamStanding { place })
                .collect(),
        }
    }
}

impl PacketBody for GameScoreReport {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.game_id);
        wire::write_u16(dst, self.game_ended_code);
        wire::write_u16(dst, self.version);
        wire::write_u16(dst, self.game_scoring);
        wire::write_u16(dst, self.players.len() as u16);
        for player in &self.players {
            wire::write_u32(dst, player.user_id);
            wire::write_u16(dst, player.team);
            wire::write_i32(dst, player.points_killed);
            wire::write_i32(dst, player.points_lost);
        }
        wire::write_u16(dst, self.team_places.len() as u16);
        for place in &self.team_places {
            wire::write_u16(dst, *place);
        }
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let game_id = wire::read_u32(src)?;
        let game_ended_code = wire::read_u16(src)?;
        let version = wire::read_u16(src)?;
        let game_scoring = wire::read_u16(src)?;

        let player_count = wire::read_u16(src)?;
        let mut players = Vec::with_capacity(player_count as usize);
        for _ in 0..player_count {
            players.push(PlayerStandingEntry {
                user_id: wire::read_u32(src)?,
                team: wire::read_u16(src)?,
                points_killed: wire::read_i32(src)?,
                points_lost: wire::read_i32(src)?,
            });
        }

        let team_count = wire::read_u16(src)?;
        let mut team_places = Vec::with_capacity(team_count as usize);
        for _ in 0..team_count {
            team_places.push(wire::read_u16(src)?);
        }

        Ok(GameScoreReport {
            game_id,
            game_ended_code,
            version,
            game_scoring,
            players,
            team_places,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{opcodes::Opcode, Packet};

    #[test]
    fn test_create_game_round_trip() {
        let body = CreateGameRequest {
            name: "sunday bloodbath".to_string(),
            map_name: "the desert".to_string(),
            game_type: 5,
            scoring_mode: 1,
            max_players: 8,
            team_game: true,
            ranked: true,
            options: GameOptions::ALLOW_ALLIANCES.bits(),
            password: String::new(),
        };
        let packet = Packet::of(Opcode::CreateGame, &body);
        let decoded: CreateGameRequest = packet.deserialize().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_game_score_round_trip() {
        let body = GameScoreReport {
            game_id: 3,
            game_ended_code: 0,
            version: 1,
            game_scoring: 0,
            players: vec![
                PlayerStandingEntry {
                    user_id: 1,
                    team: 0,
                    points_killed: 10,
                    points_lost: -2,
                },
                PlayerStandingEntry {
                    user_id: 2,
                    team: 1,
                    points_killed: 4,
                    points_lost: 9,
                },
            ],
            team_places: vec![0, 1],
        };
        let packet = Packet::of(Opcode::GameScore, &body);
        let decoded: GameScoreReport = packet.deserialize().unwrap();
        assert_eq!(decoded, body);

        let standings = decoded.into_standings();
        assert_eq!(standings.number_of_players, 2);
        assert_eq!(standings.teams.len(), 2);
    }
}
