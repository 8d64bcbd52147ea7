//! Authentication handlers.

use crate::database::AuditEvent;
use crate::packet::opcodes::{MessageCode, Opcode};
use crate::packet::Packet;
use crate::server::Server;
use crate::session::models::auth::{
    ChangePasswordRequest, LoginRequest, LoginSuccess, ServerMessage, SetPlayerDataRequest,
};
use crate::session::routes::{require_user, RouteError, RouteResult};
use crate::session::Connection;
use crate::utils::hashing::{generate_salt, hash_password, verify_password, PasswordScheme};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// One failed credential check: identical response whether the user is
/// missing, banned, locked or mistyped their password, so account
/// existence is never disclosed. The attempt cap turns the failure
/// terminal.
fn login_failed(connection: &Connection) -> RouteError {
    if connection.record_failed_login() {
        RouteError::Terminal(MessageCode::LoginFailedBadUserOrPassword)
    } else {
        RouteError::Message(MessageCode::LoginFailedBadUserOrPassword)
    }
}

pub async fn handle_login(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: LoginRequest,
) -> RouteResult {
    let user = match server.stores.users.get_by_name(&request.login).await? {
        Some(user) => user,
        None => return Err(login_failed(connection)),
    };

    let now = Utc::now().timestamp();
    if user.is_banned(now) {
        debug!("refused banned account {} (user {})", user.login, user.id);
        return Err(login_failed(connection));
    }

    if !verify_password(&request.password, &user.password_hash, &user.salt, user.scheme) {
        return Err(login_failed(connection));
    }

    // Duplicate-login policy: the old session is told and kicked, the
    // new one is admitted
    let previous = server.sessions.attach(user.id, connection.id);
    for old in previous {
        if old == connection.id {
            continue;
        }
        if let Some(old_connection) = server.connections.get(old) {
            warn!(
                "kicking duplicate session for user {} (CID: {})",
                user.id, old
            );
            old_connection.send_message(MessageCode::AccountAlreadyLoggedIn);
            old_connection.close();
        }
    }

    let token = server.sessions.create_token(connection.host_addr, user.id);
    *connection.token.lock() = Some(token);
    connection
        .client_flags
        .store(request.client_flags, Ordering::Release);

    // Record last-login bookkeeping; a failure here does not fail the
    // login
    let mut updated = user.clone();
    updated.last_login_time = now;
    updated.last_login_addr = connection.host_addr;
    if let Err(err) = server.stores.users.update(&updated).await {
        error!("failed to store last login for {}: {}", user.id, err);
    }

    if let Err(err) = server
        .stores
        .audit
        .append(AuditEvent::now(
            "login",
            format!("user={} addr={} build={}", user.id, connection.addr, request.build_version),
        ))
        .await
    {
        warn!("failed to audit login for {}: {}", user.id, err);
    }

    info!("user logged in (user: {}, CID: {})", user.id, connection.id);

    connection.send(Packet::of(
        Opcode::UserSuccessfulLogin,
        &LoginSuccess {
            user_id: user.id,
            order: user.order,
            token,
        },
    ));

    // Room roster straight after login so the client can pick a door
    connection.send(super::room::room_list_packet(server));

    if !server.config.motd.is_empty() {
        connection.send(Packet::of(
            Opcode::MessageOfTheDay,
            &ServerMessage {
                code: 0,
                text: server.config.motd.clone(),
            },
        ));
    }

    Ok(())
}

pub async fn handle_logout(server: &Arc<Server>, connection: &Arc<Connection>) -> RouteResult {
    let user_id = require_user(server, connection)?;

    // The token issued to this connection dies with the session
    if let Some(token) = connection.token.lock().take() {
        server.sessions.invalidate_token(&token);
    }

    server.sessions.detach(connection.id);
    if let Some(room_id) = server.rooms.leave(user_id) {
        super::room::publish_member_left(server, room_id, user_id);
    }
    if let Some(game_id) = server.games.game_of(user_id) {
        let _ = server.games.remove_player(game_id, user_id).await;
    }
    if let Some(game_id) = server.games.hosted_by(user_id) {
        let _ = server.games.remove(game_id, user_id).await;
    }

    connection.send_message(MessageCode::LogoutSuccessful);
    Ok(())
}

pub async fn handle_change_password(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: ChangePasswordRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    let mut user = server
        .stores
        .users
        .get_by_id(user_id)
        .await?
        .ok_or(RouteError::Internal)?;

    // Rehash under the current default with a fresh salt
    let salt = generate_salt();
    let hash = hash_password(&request.new_password, &salt, PasswordScheme::DEFAULT)
        .map_err(|err| {
            error!("password hashing failed for {}: {}", user_id, err);
            RouteError::Internal
        })?;
    user.password_hash = hash;
    user.salt = salt;
    user.scheme = PasswordScheme::DEFAULT;
    server.stores.users.update(&user).await?;

    // Every outstanding token for this user dies, and every live
    // connection is closed; the client re-authenticates with the new
    // password
    server.sessions.invalidate_user_tokens(user_id);
    *connection.token.lock() = None;
    for other in server.sessions.connections_of(user_id) {
        if let Some(other_connection) = server.connections.get(other) {
            other_connection.send_message(MessageCode::LogoutSuccessful);
            other_connection.close();
        }
    }

    if let Err(err) = server
        .stores
        .audit
        .append(AuditEvent::now(
            "password-change",
            format!("user={}", user_id),
        ))
        .await
    {
        warn!("failed to audit password change for {}: {}", user_id, err);
    }

    if !server.config.no_mail {
        // Mail delivery lives outside this service; the audit trail
        // carries the notification request
        debug!("queueing password-change notice for user {}", user_id);
    }

    info!("password changed for user {}", user_id);
    Ok(())
}

pub async fn handle_set_player_data(
    server: &Arc<Server>,
    connection: &Arc<Connection>,
    request: SetPlayerDataRequest,
) -> RouteResult {
    let user_id = require_user(server, connection)?;
    let mut user = server
        .stores
        .users
        .get_by_id(user_id)
        .await?
        .ok_or(RouteError::Internal)?;

    user.display_name = request.display_name;
    server.stores.users.update(&user).await?;
    Ok(())
}
