//! Room registry: the fixed roster of lobby rooms, their membership
//! sets and chat routing.
//!
//! Rooms are defined once at startup by the room-list file; users never
//! create them. Membership is dynamic and guarded by one mutex per
//! room. Handlers copy recipient lists out under the lock and send
//! after releasing it, so no lock is ever held across a network write.

use crate::database::entities::Caste;
use crate::utils::types::{ConnectionId, GameId, RoomId, UserId};
use bitflags::bitflags;
use log::warn;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

bitflags! {
    /// Which client applications a room (or client) speaks for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GameTypeFlags: u32 {
        const MYTH1 = 1 << 0;
        const MYTH2 = 1 << 1;
        const MYTH3 = 1 << 2;
        const MARATHON = 1 << 3;
        const JCHAT = 1 << 4;
    }
}

/// Name table for the room-list file. Bare `MYTH` is what old Myth2
/// 1.3.x clients report, so it aliases to MYTH2 rather than the union.
const GAME_NAMES: &[(&str, GameTypeFlags)] = &[
    ("MYTH1", GameTypeFlags::MYTH1),
    ("MYTH2", GameTypeFlags::MYTH2),
    ("MYTH3", GameTypeFlags::MYTH3),
    ("MARATHON", GameTypeFlags::MARATHON),
    ("JCHAT", GameTypeFlags::JCHAT),
];

impl GameTypeFlags {
    /// Parses a comma separated list of game names
    pub fn from_name_list(name_list: &str) -> GameTypeFlags {
        let mut flags = GameTypeFlags::empty();
        for name in name_list.split(',') {
            let name = name.trim().to_ascii_uppercase();
            if name == "MYTH" {
                flags |= GameTypeFlags::MYTH2;
                continue;
            }
            if let Some((_, value)) = GAME_NAMES.iter().find(|(n, _)| *n == name) {
                flags |= *value;
            }
        }
        flags
    }

    /// Formats flags back into the comma separated name list form
    pub fn to_name_list(self) -> String {
        let names: Vec<&str> = GAME_NAMES
            .iter()
            .filter(|(_, value)| self.contains(*value))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            "UNKNOWN".to_string()
        } else {
            names.join(",")
        }
    }
}

/// One line of the room-list file
#[derive(Debug, Clone, PartialEq)]
pub struct RoomTemplate {
    pub supported_game_flags: GameTypeFlags,
    pub room_id: RoomId,
    pub ranked: bool,
    pub country_code: u16,
    pub min_caste: Caste,
    pub max_caste: Caste,
    pub tournament: bool,
}

impl RoomTemplate {
    /// Parses a single `game_name_csv room_id ranked country_code
    /// min_caste max_caste tournament` line, None when the line is
    /// malformed
    fn parse_line(line: &str) -> Option<RoomTemplate> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 7 {
            return None;
        }

        let supported_game_flags = GameTypeFlags::from_name_list(parts[0]);
        if supported_game_flags.is_empty() {
            warn!("unrecognized name list in room list file '{}'", parts[0]);
            return None;
        }

        Some(RoomTemplate {
            supported_game_flags,
            room_id: parts[1].parse().ok()?,
            ranked: parts[2].parse::<u8>().ok()? != 0,
            country_code: parts[3].parse().ok()?,
            min_caste: Caste::from_index(parts[4].parse().ok()?)?,
            max_caste: Caste::from_index(parts[5].parse().ok()?)?,
            tournament: parts[6].parse::<u8>().ok()? != 0,
        })
    }

    /// Parses the whole room-list file, skipping blank, commented and
    /// malformed lines
    pub fn parse_list(contents: &str) -> Vec<RoomTemplate> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(RoomTemplate::parse_line)
            .collect()
    }
}

/// A member as seen by the rest of the room
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub user_id: UserId,
    pub connection: ConnectionId,
    pub display_name: String,
    pub caste: Caste,
    /// Ranked points as surfaced to clients (floored at zero)
    pub points: u32,
}

#[derive(Default)]
struct RoomState {
    members: HashMap<UserId, RoomMember>,
    games: HashSet<GameId>,
}

/// A single lobby room: immutable template plus mutable membership
pub struct Room {
    pub template: RoomTemplate,
    state: Mutex<RoomState>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("no such room")]
    UnknownRoom,
    #[error("the desired room is full")]
    RoomFull,
    #[error("caste is outside the room's admission range")]
    CasteRestricted,
    #[error("client game type is not supported by the room")]
    UnsupportedGameType,
}

/// Registry over the fixed room roster
pub struct Rooms {
    rooms: HashMap<RoomId, Arc<Room>>,
    /// Which room each user currently occupies
    occupancy: Mutex<HashMap<UserId, RoomId>>,
    /// Upper bound on members per room
    max_occupancy: usize,
}

impl Rooms {
    pub fn new(templates: Vec<RoomTemplate>, max_occupancy: usize) -> Rooms {
        let rooms = templates
            .into_iter()
            .map(|template| {
                (
                    template.room_id,
                    Arc::new(Room {
                        template,
                        state: Mutex::new(RoomState::default()),
                    }),
                )
            })
            .collect();
        Rooms {
            rooms,
            occupancy: Mutex::new(HashMap::new()),
            max_occupancy,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room templates for the ROOM_LIST packet, ordered by id
    pub fn templates(&self) -> Vec<RoomTemplate> {
        let mut templates: Vec<RoomTemplate> = self
            .rooms
            .values()
            .map(|room| room.template.clone())
            .collect();
        templates.sort_by_key(|template| template.room_id);
        templates
    }

    /// Admits a user into a room. Admission requires the room to
    /// exist, the user's caste to be inside the admission range, the
    /// client's game-type flags to be a subset of the room's, and the
    /// room to have space. Any previous room is left implicitly; the
    /// room left (if any) is returned so membership deltas can be
    /// published there too.
    pub fn join(
        &self,
        room_id: RoomId,
        member: RoomMember,
        client_flags: GameTypeFlags,
    ) -> Result<Option<RoomId>, RoomError> {
        let room = self.rooms.get(&room_id).ok_or(RoomError::UnknownRoom)?;
        let template = &room.template;

        if member.caste < template.min_caste || member.caste > template.max_caste {
            return Err(RoomError::CasteRestricted);
        }
        if !template.supported_game_flags.contains(client_flags) {
            return Err(RoomError::UnsupportedGameType);
        }

        let user_id = member.user_id;
        let previous = self.room_of(user_id);

        // Re-entering the current room just refreshes the member entry
        if previous == Some(room_id) {
            room.state.lock().members.insert(user_id, member);
            return Ok(None);
        }

        // Take the seat in the new room before touching the old one; a
        // failed admission must leave the current membership untouched
        {
            let state = &mut *room.state.lock();
            if state.members.len() >= self.max_occupancy {
                return Err(RoomError::RoomFull);
            }
            state.members.insert(user_id, member);
        }

        if let Some(old_id) = previous {
            if let Some(old_room) = self.rooms.get(&old_id) {
                old_room.state.lock().members.remove(&user_id);
            }
        }
        self.occupancy.lock().insert(user_id, room_id);

        Ok(previous)
    }

    /// Removes the user from whichever room they occupy
    pub fn leave(&self, user_id: UserId) -> Option<RoomId> {
        let room_id = self.occupancy.lock().remove(&user_id)?;
        if let Some(room) = self.rooms.get(&room_id) {
            room.state.lock().members.remove(&user_id);
        }
        Some(room_id)
    }

    pub fn room_of(&self, user_id: UserId) -> Option<RoomId> {
        self.occupancy.lock().get(&user_id).copied()
    }

    /// Snapshot of a room's member list
    pub fn members(&self, room_id: RoomId) -> Vec<RoomMember> {
        match self.rooms.get(&room_id) {
            Some(room) => room.state.lock().members.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Broadcast recipients: every member connection except the sender
    pub fn broadcast_targets(&self, room_id: RoomId, sender: UserId) -> Vec<ConnectionId> {
        match self.rooms.get(&room_id) {
            Some(room) => room
                .state
                .lock()
                .members
                .values()
                .filter(|member| member.user_id != sender)
                .map(|member| member.connection)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every member connection of every room, for admin-wide broadcast
    pub fn global_targets(&self, sender: UserId) -> Vec<ConnectionId> {
        self.rooms
            .values()
            .flat_map(|room| {
                room.state
                    .lock()
                    .members
                    .values()
                    .filter(|member| member.user_id != sender)
                    .map(|member| member.connection)
                    .collect::<Vec<ConnectionId>>()
            })
            .collect()
    }

    /// Looks up a member of the room by display name, for directed
    /// delivery
    pub fn find_member(&self, room_id: RoomId, name: &str) -> Option<RoomMember> {
        let room = self.rooms.get(&room_id)?;
        let state = room.state.lock();
        state
            .members
            .values()
            .find(|member| member.display_name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Tracks a game advertised in this room
    pub fn add_game(&self, room_id: RoomId, game_id: GameId) {
        if let Some(room) = self.rooms.get(&room_id) {
            room.state.lock().games.insert(game_id);
        }
    }

    /// Drops an advertised game from its room
    pub fn remove_game(&self, room_id: RoomId, game_id: GameId) {
        if let Some(room) = self.rooms.get(&room_id) {
            room.state.lock().games.remove(&game_id);
        }
    }

}

#[cfg(test)]
mod test {
    use super::*;
    use uuid::Uuid;

    fn member(user_id: UserId, caste: Caste) -> RoomMember {
        RoomMember {
            user_id,
            connection: Uuid::new_v4(),
            display_name: format!("player-{user_id}"),
            caste,
            points: 0,
        }
    }

    fn rooms() -> Rooms {
        let templates = RoomTemplate::parse_list(
            "MYTH2 1 1 0 0 16 0\n\
             MYTH2,MYTH3 2 1 0 3 8 0\n",
        );
        Rooms::new(templates, 4)
    }

    #[test]
    fn test_parse_room_list() {
        let templates = RoomTemplate::parse_list(
            "# comment line\n\
             MYTH 7 1 0 0 16 0\n\
             MARATHON,JCHAT 9 0 2 3 8 1\n\
             BOGUS 1 1 0 0 16 0\n\
             MYTH2 too few fields\n",
        );
        assert_eq!(templates.len(), 2);
        // Bare MYTH aliases to MYTH2 only
        assert_eq!(templates[0].supported_game_flags, GameTypeFlags::MYTH2);
        assert_eq!(templates[0].room_id, 7);
        assert!(templates[0].ranked);
        assert_eq!(
            templates[1].supported_game_flags,
            GameTypeFlags::MARATHON | GameTypeFlags::JCHAT
        );
        assert_eq!(templates[1].min_caste, Caste::SwordAndDagger);
        assert!(templates[1].tournament);
    }

    #[test]
    fn test_name_list_round_trip() {
        let flags = GameTypeFlags::from_name_list("MYTH2,MARATHON");
        assert_eq!(flags.to_name_list(), "MYTH2,MARATHON");
    }

    #[test]
    fn test_caste_admission() {
        let rooms = rooms();

        // Caste 2 is below the room's minimum of 3
        let denied = rooms.join(2, member(1, Caste::KrisKnife), GameTypeFlags::MYTH2);
        assert_eq!(denied, Err(RoomError::CasteRestricted));

        // Bumped to caste 5 the same user is admitted
        let admitted = rooms.join(2, member(1, Caste::CrossedAxes), GameTypeFlags::MYTH2);
        assert_eq!(admitted, Ok(None));
        assert_eq!(rooms.room_of(1), Some(2));
    }

    #[test]
    fn test_game_type_gating() {
        let rooms = rooms();
        let denied = rooms.join(1, member(1, Caste::Shield), GameTypeFlags::MYTH3);
        assert_eq!(denied, Err(RoomError::UnsupportedGameType));
        let admitted = rooms.join(2, member(1, Caste::Shield), GameTypeFlags::MYTH3);
        assert_eq!(admitted, Ok(None));
    }

    #[test]
    fn test_room_capacity() {
        let rooms = rooms();
        for user_id in 1..=4 {
            rooms
                .join(1, member(user_id, Caste::Shield), GameTypeFlags::MYTH2)
                .unwrap();
        }
        let denied = rooms.join(1, member(5, Caste::Shield), GameTypeFlags::MYTH2);
        assert_eq!(denied, Err(RoomError::RoomFull));
    }

    #[test]
    fn test_full_room_rejection_keeps_previous_seat() {
        let rooms = rooms();
        rooms
            .join(2, member(9, Caste::Shield), GameTypeFlags::MYTH2)
            .unwrap();
        for user_id in 1..=4 {
            rooms
                .join(1, member(user_id, Caste::Shield), GameTypeFlags::MYTH2)
                .unwrap();
        }

        // The full room refuses the move and the old seat survives
        let denied = rooms.join(1, member(9, Caste::Shield), GameTypeFlags::MYTH2);
        assert_eq!(denied, Err(RoomError::RoomFull));
        assert_eq!(rooms.room_of(9), Some(2));
        assert!(rooms
            .members(2)
            .iter()
            .any(|present| present.user_id == 9));
        assert_eq!(rooms.members(1).len(), 4);
    }

    #[test]
    fn test_rejoining_same_room_is_not_a_move() {
        let rooms = rooms();
        rooms
            .join(1, member(1, Caste::Shield), GameTypeFlags::MYTH2)
            .unwrap();
        let rejoined = rooms.join(1, member(1, Caste::Shield), GameTypeFlags::MYTH2);
        assert_eq!(rejoined, Ok(None));
        assert_eq!(rooms.members(1).len(), 1);
        assert_eq!(rooms.room_of(1), Some(1));
    }

    #[test]
    fn test_implicit_leave_on_join() {
        let rooms = rooms();
        rooms
            .join(1, member(1, Caste::Shield), GameTypeFlags::MYTH2)
            .unwrap();
        let left = rooms
            .join(2, member(1, Caste::Shield), GameTypeFlags::MYTH2)
            .unwrap();
        assert_eq!(left, Some(1));
        assert!(rooms.members(1).is_empty());
        assert_eq!(rooms.room_of(1), Some(2));
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let rooms = rooms();
        let alice = member(1, Caste::Shield);
        let bob = member(2, Caste::Shield);
        let bob_conn = bob.connection;
        rooms.join(1, alice, GameTypeFlags::MYTH2).unwrap();
        rooms.join(1, bob, GameTypeFlags::MYTH2).unwrap();

        let targets = rooms.broadcast_targets(1, 1);
        assert_eq!(targets, vec![bob_conn]);
    }
}
