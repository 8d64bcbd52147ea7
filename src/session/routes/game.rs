//! Game lifecycle handlers.

use crate::packet::opcodes::{MessageCode, Opcode};
use crate::packet::Packet;
use crate::server::Server;
use crate::session::models::game::{
    CreateGameRequest, EndGameRequest, GameList, GameListEntry, GameScoreReport, JoinGameRequest,
    LeaveGameRequest, RemoveGameRequest, SetReadyRequest, SetTeamRequest, StartGameRequest,
};
use crate::session::models::search::GameSearchRequest;
use crate::session::routes::{require_user, RouteError, RouteResult};
use crate::session::Connection;
use crate::services::game::search::GameAdvert;
use crate::services::game::GameState;
use crate::utils::hashing::{generate_salt, hash_password, verify_password, PasswordScheme};
use log::error;
use std::sync::Arc;

pub async fn handle_create(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: CreateGameRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    // Games are advertised inside the host's room
    let room_id = server
        .rooms
        .room_of(user_id)
        .ok_or(RouteError::Message(MessageCode::PlayerNotInRoom))?;

    let password_hash = if request.password.is_empty() {
        None
    } else {
        let salt = generate_salt();
        Some(
            hash_password(&request.password, &salt, PasswordScheme::DEFAULT).map_err(|err| {
                error!("failed to hash game password: {}", err);
                RouteError::Internal
            })?,
        )
    };

    let settings = request.into_settings(password_hash);
    let game_id = server.games.create(user_id, room_id, settings)?;
    // The host occupies the first slot of its own game
    server.games.add_player(game_id, user_id)?;
    Ok(())
}

pub async fn handle_join(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: JoinGameRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;

    // Private games gate on their password before a slot is taken
    {
        let game = server
            .games
            .get_by_id(request.game_id)
            .ok_or(RouteError::Message(MessageCode::GameNotFound))?;
        let game = game.read();
        if let Some(hash) = &game.settings.password_hash {
            if !verify_password(&request.password, hash, &[], PasswordScheme::DEFAULT) {
                return Err(RouteError::Message(MessageCode::LoginFailedBadUserOrPassword));
            }
        }
    }

    server.games.add_player(request.game_id, user_id)?;
    Ok(())
}

pub async fn handle_leave(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: LeaveGameRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    server.games.remove_player(request.game_id, user_id).await?;
    Ok(())
}

pub fn handle_set_ready(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: SetReadyRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    server
        .games
        .set_ready(request.game_id, user_id, request.ready)?;
    Ok(())
}

pub fn handle_set_team(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: SetTeamRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    server
        .games
        .set_team(request.game_id, user_id, request.team)?;
    Ok(())
}

pub fn handle_start(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: StartGameRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    server.games.start(request.game_id, user_id)?;
    Ok(())
}

pub async fn handle_end(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: EndGameRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    server.games.end(request.game_id, user_id).await?;
    Ok(())
}

pub async fn handle_remove(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: RemoveGameRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    server.games.remove(request.game_id, user_id).await?;
    Ok(())
}

pub async fn handle_score(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    report: GameScoreReport,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    let game_id = report.game_id;
    server
        .games
        .submit_standings(game_id, user_id, report.into_standings())
        .await?;
    Ok(())
}

/// Answers a search query with a GAME_LIST of matching adverts
pub fn handle_search(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: GameSearchRequest,
) -> RouteResult {
    let matches = server.search.query(&request.into_query());
    let games = matches.iter().map(advert_entry).collect();
    connection.send(Packet::of(Opcode::GameList, &GameList { games }));
    Ok(())
}

fn advert_entry(advert: &GameAdvert) -> GameListEntry {
    GameListEntry {
        game_id: advert.id,
        host: advert.host,
        state: if advert.in_progress {
            GameState::InProgress as u8
        } else {
            GameState::Waiting as u8
        },
        name: advert.name.clone(),
        map_name: advert.map_name.clone(),
        player_count: advert.player_count,
        max_players: advert.max_players,
    }
}
