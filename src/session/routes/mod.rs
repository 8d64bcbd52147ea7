//! Opcode dispatch into the request handlers.
//!
//! The opcode space is closed, so dispatch is a plain match: decode
//! the body, check what the connection class and auth state allow,
//! call the handler. Handler errors map onto SERVER_MESSAGE codes;
//! protocol violations terminate the connection.

use crate::database::StoreError;
use crate::packet::opcodes::{MessageCode, Opcode};
use crate::packet::wire::WireError;
use crate::packet::{Packet, PacketBody};
use crate::server::Server;
use crate::services::game::{GameError, StartError};
use crate::services::rooms::RoomError;
use crate::session::{Connection, ConnectionClass};
use crate::utils::types::UserId;
use log::{debug, error, info};
use std::sync::Arc;

mod auth;
mod game;
mod room;

/// How a failed handler is reported to the client
#[derive(Debug)]
pub enum RouteError {
    /// Send the code's standard SERVER_MESSAGE, keep the connection
    Message(MessageCode),
    /// Send a SERVER_MESSAGE with specific display text
    MessageText(MessageCode, String),
    /// Send the code then terminate the connection
    Terminal(MessageCode),
    /// Storage or other internal failure: logged, surfaced as
    /// INTERNAL_ERROR, connection persists
    Internal,
}

pub type RouteResult = Result<(), RouteError>;

impl From<WireError> for RouteError {
    fn from(err: WireError) -> Self {
        debug!("malformed packet body: {}", err);
        RouteError::Terminal(MessageCode::SyntaxError)
    }
}

impl From<StoreError> for RouteError {
    fn from(err: StoreError) -> Self {
        error!("store failure while handling request: {}", err);
        RouteError::Internal
    }
}

impl From<RoomError> for RouteError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::UnknownRoom => RouteError::Message(MessageCode::SyntaxError),
            RoomError::RoomFull => RouteError::Message(MessageCode::RoomFull),
            RoomError::CasteRestricted => RouteError::Message(MessageCode::CasteRestricted),
            RoomError::UnsupportedGameType => RouteError::Message(MessageCode::UnknownGameType),
        }
    }
}

impl From<GameError> for RouteError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::UnknownGame => RouteError::Message(MessageCode::GameNotFound),
            GameError::GameFull => RouteError::Message(MessageCode::GameFull),
            GameError::NotJoinable => RouteError::Message(MessageCode::GameNotWaiting),
            GameError::NotInGame => RouteError::Message(MessageCode::NotInGame),
            GameError::NotHost => RouteError::Message(MessageCode::NotGameHost),
            GameError::AlreadyHosting => RouteError::Message(MessageCode::GameAlreadyExists),
            GameError::Start(StartError::NotWaiting) => {
                RouteError::Message(MessageCode::GameNotWaiting)
            }
            // Start rejections carry their human-readable reason
            GameError::Start(reason) => {
                RouteError::MessageText(MessageCode::GameNotReady, reason.to_string())
            }
        }
    }
}

/// Decodes the packet body or fails the request as malformed
fn decode<B: PacketBody>(packet: &Packet) -> Result<B, RouteError> {
    Ok(packet.deserialize::<B>()?)
}

/// The authenticated user behind a connection
fn require_user(server: &Server, connection: &Connection) -> Result<UserId, RouteError> {
    server
        .sessions
        .user_of(connection.id)
        .ok_or(RouteError::Message(MessageCode::UserNotLoggedIn))
}

/// Whether this connection class may send this opcode at all.
/// Anything else is a protocol violation.
fn class_allows(class: ConnectionClass, opcode: Opcode) -> bool {
    match class {
        ConnectionClass::Player => !matches!(opcode, Opcode::Shutdown),
        // Room servers use the side services only
        ConnectionClass::RoomServer => matches!(
            opcode,
            Opcode::Keepalive | Opcode::GameSearchQuery | Opcode::Login
        ),
        ConnectionClass::Web => matches!(opcode, Opcode::Keepalive | Opcode::Shutdown),
    }
}

/// Routes one decoded frame. `Err` values are rendered by the caller.
pub async fn handle(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    packet: Packet,
) -> RouteResult {
    let opcode = match Opcode::from_u16(packet.opcode) {
        Some(opcode) => opcode,
        None => {
            debug!(
                "unknown opcode {} from {} (CID: {})",
                packet.opcode, connection.addr, connection.id
            );
            return Err(RouteError::Terminal(MessageCode::SyntaxError));
        }
    };

    if !opcode.client_sendable() || !class_allows(connection.class, opcode) {
        return Err(RouteError::Terminal(MessageCode::SyntaxError));
    }

    match opcode {
        Opcode::Keepalive => {
            // Echo, and count as game activity for players mid-game
            connection.send(Packet::empty(Opcode::Keepalive));
            if let Some(user_id) = server.sessions.user_of(connection.id) {
                if let Some(game_id) = server.games.game_of(user_id) {
                    server.games.touch(game_id, user_id);
                }
            }
            Ok(())
        }

        Opcode::Login => auth::handle_login(server, connection, decode(&packet)?).await,
        Opcode::Logout => auth::handle_logout(server, connection).await,
        Opcode::ChangePassword => {
            auth::handle_change_password(server, connection, decode(&packet)?).await
        }
        Opcode::SetPlayerData => {
            auth::handle_set_player_data(server, connection, decode(&packet)?).await
        }

        Opcode::RoomLogin | Opcode::ChangeRoom => {
            room::handle_join(server, connection, decode(&packet)?).await
        }
        Opcode::RoomBroadcast => room::handle_broadcast(server, connection, &packet).await,
        Opcode::DirectedData => room::handle_directed(server, connection, &packet).await,

        Opcode::CreateGame => game::handle_create(server, connection, decode(&packet)?).await,
        Opcode::JoinGame => game::handle_join(server, connection, decode(&packet)?).await,
        Opcode::LeaveGame => game::handle_leave(server, connection, decode(&packet)?).await,
        Opcode::SetPlayerReady => game::handle_set_ready(server, connection, decode(&packet)?),
        Opcode::SetPlayerTeam => game::handle_set_team(server, connection, decode(&packet)?),
        Opcode::StartGame => game::handle_start(server, connection, decode(&packet)?),
        Opcode::EndGame => game::handle_end(server, connection, decode(&packet)?).await,
        Opcode::RemoveGame => game::handle_remove(server, connection, decode(&packet)?).await,
        Opcode::GameScore => game::handle_score(server, connection, decode(&packet)?).await,
        Opcode::GameSearchQuery => game::handle_search(server, connection, decode(&packet)?),

        Opcode::Shutdown => {
            // Admin surface: only trusted peers on the web listener
            if !crate::utils::net::is_trusted_peer(connection.addr.ip(), server.primary_addr) {
                return Err(RouteError::Terminal(MessageCode::SyntaxError));
            }
            info!("shutdown requested over admin connection {}", connection.id);
            server.shutdown.notify_waiters();
            Ok(())
        }

        // Server→client opcodes are rejected by the sendable check
        _ => Err(RouteError::Terminal(MessageCode::SyntaxError)),
    }
}

/// Releases everything a closing connection held: its session, its
/// room seat and any game slots. Runs exactly once per connection.
pub async fn handle_disconnect(server: &Arc<Server>, connection: &Arc<Connection>) {
    let user_id = match server.sessions.detach(connection.id) {
        Some(user_id) => user_id,
        None => return,
    };

    // Only tear player state down when this was the user's last live
    // connection; a kicked duplicate must not strip the new session
    if !server.sessions.connections_of(user_id).is_empty() {
        return;
    }

    if let Some(room_id) = server.rooms.leave(user_id) {
        room::publish_member_left(server, room_id, user_id);
    }

    if let Some(game_id) = server.games.game_of(user_id) {
        if let Err(err) = server.games.remove_player(game_id, user_id).await {
            debug!("disconnect cleanup for game {}: {}", game_id, err);
        }
    }
    if let Some(game_id) = server.games.hosted_by(user_id) {
        if let Err(err) = server.games.remove(game_id, user_id).await {
            debug!("disconnect cleanup for hosted game {}: {}", game_id, err);
        }
    }

    debug!(
        "session ended (CID: {}, user: {})",
        connection.id, user_id
    );
}
