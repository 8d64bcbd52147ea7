//! Room membership and chat handlers.

use crate::database::entities::UserFlags;
use crate::packet::opcodes::{MessageCode, Opcode};
use crate::packet::Packet;
use crate::server::Server;
use crate::session::models::game::{GameList, GameListEntry};
use crate::session::models::room::{
    DirectedData, PlayerList, PlayerListAction, PlayerListEntry, RoomBroadcast, RoomList,
    RoomListEntry, RoomLoginRequest, RoomWelcome,
};
use crate::session::routes::{require_user, RouteError, RouteResult};
use crate::session::Connection;
use crate::services::rooms::{GameTypeFlags, RoomMember};
use crate::utils::types::{RoomId, UserId};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Builds the ROOM_LIST packet from the current roster
pub fn room_list_packet(server: &Server) -> Packet {
    let rooms = server
        .rooms
        .templates()
        .iter()
        .map(|template| {
            let player_count = server.rooms.members(template.room_id).len() as u16;
            RoomListEntry::of(template, player_count)
        })
        .collect();
    Packet::of(Opcode::RoomList, &RoomList { rooms })
}

/// Publishes a leave delta to a room's remaining members
pub fn publish_member_left(server: &Server, room_id: RoomId, user_id: UserId) {
    let targets = server.rooms.broadcast_targets(room_id, user_id);
    let packet = Packet::of(
        Opcode::PlayerList,
        &PlayerList {
            action: PlayerListAction::Remove,
            players: vec![PlayerListEntry {
                user_id,
                caste: 0,
                points: 0,
                display_name: String::new(),
            }],
        },
    );
    server.connections.fan_out(&targets, &packet);
}

pub async fn handle_join(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: RoomLoginRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    let user = server
        .stores
        .users
        .get_by_id(user_id)
        .await?
        .ok_or(RouteError::Internal)?;

    let member = RoomMember {
        user_id,
        connection: connection.id,
        display_name: user.display_name.clone(),
        caste: user.caste,
        points: user.ranked_score.display_points(),
    };
    let client_flags =
        GameTypeFlags::from_bits_truncate(connection.client_flags.load(Ordering::Acquire));

    let left = server.rooms.join(request.room_id, member.clone(), client_flags)?;
    if let Some(old_room) = left {
        publish_member_left(server, old_room, user_id);
    }

    // The join delta goes to everyone already present
    let targets = server.rooms.broadcast_targets(request.room_id, user_id);
    let delta = Packet::of(
        Opcode::PlayerList,
        &PlayerList {
            action: PlayerListAction::Add,
            players: vec![PlayerListEntry::of(&member)],
        },
    );
    server.connections.fan_out(&targets, &delta);

    // The joiner gets the full picture: welcome, roster, games
    connection.send(Packet::of(
        Opcode::RoomLoginSuccessful,
        &RoomWelcome {
            room_id: request.room_id,
        },
    ));
    let players = server
        .rooms
        .members(request.room_id)
        .iter()
        .map(PlayerListEntry::of)
        .collect();
    connection.send(Packet::of(
        Opcode::PlayerList,
        &PlayerList {
            action: PlayerListAction::Full,
            players,
        },
    ));
    let games = server
        .games
        .snapshot_room(request.room_id)
        .iter()
        .map(GameListEntry::of)
        .collect();
    connection.send(Packet::of(Opcode::GameList, &GameList { games }));

    Ok(())
}

pub async fn handle_broadcast(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    packet: &Packet,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    let mut body: RoomBroadcast = super::decode(packet)?;
    body.sender = user_id;
    let outgoing = Packet::of(Opcode::RoomBroadcast, &body);

    match server.rooms.room_of(user_id) {
        Some(room_id) => {
            let targets = server.rooms.broadcast_targets(room_id, user_id);
            server.connections.fan_out(&targets, &outgoing);
            Ok(())
        }
        None => {
            // Administrators outside any room reach the whole server
            let user = server
                .stores
                .users
                .get_by_id(user_id)
                .await?
                .ok_or(RouteError::Internal)?;
            if !user.flags.contains(UserFlags::ADMIN) {
                return Err(RouteError::Message(MessageCode::PlayerNotInRoom));
            }
            let targets = server.rooms.global_targets(user_id);
            server.connections.fan_out(&targets, &outgoing);
            Ok(())
        }
    }
}

pub async fn handle_directed(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    packet: &Packet,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    let room_id = server
        .rooms
        .room_of(user_id)
        .ok_or(RouteError::Message(MessageCode::PlayerNotInRoom))?;

    let mut body: DirectedData = super::decode(packet)?;
    body.sender = user_id;

    // Delivery is gated on the recipient sharing the sender's room
    let recipient = server
        .rooms
        .find_member(room_id, &body.recipient_name)
        .ok_or(RouteError::Message(MessageCode::PlayerNotInRoom))?;

    server
        .connections
        .send_to(recipient.connection, Packet::of(Opcode::DirectedData, &body));
    Ok(())
}
