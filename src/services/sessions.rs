//! Service for authentication tokens and the mapping between live
//! connections and authenticated users.

use crate::utils::types::{ConnectionId, UserId};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Wire size of a bearer token
pub const TOKEN_SIZE: usize = 32;

/// Default token lifetime (2 days)
pub const TOKEN_LIFETIME_SECS: u32 = 2 * 24 * 60 * 60;

/// Opaque bearer token: `host_ip:u32 LE ‖ user_id:u32 LE ‖
/// expiration:u32 LE (unix seconds) ‖ random:20`.
///
/// A token authenticates exactly one user from exactly one network
/// location for at most its advertised lifetime. The random padding
/// makes tokens unguessable; possession is the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthToken([u8; TOKEN_SIZE]);

impl AuthToken {
    /// Mints a token bound to the provided host address
    pub fn generate(host_addr: u32, user_id: UserId, expiration: u32) -> AuthToken {
        let mut data = [0u8; TOKEN_SIZE];
        data[0..4].copy_from_slice(&host_addr.to_le_bytes());
        data[4..8].copy_from_slice(&user_id.to_le_bytes());
        data[8..12].copy_from_slice(&expiration.to_le_bytes());
        rand::thread_rng().fill_bytes(&mut data[12..]);
        AuthToken(data)
    }

    pub fn from_bytes(raw: &[u8]) -> Option<AuthToken> {
        let data: [u8; TOKEN_SIZE] = raw.try_into().ok()?;
        Some(AuthToken(data))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    pub fn host_addr(&self) -> u32 {
        u32::from_le_bytes(self.0[0..4].try_into().unwrap())
    }

    pub fn user_id(&self) -> UserId {
        u32::from_le_bytes(self.0[4..8].try_into().unwrap())
    }

    pub fn expiration(&self) -> u32 {
        u32::from_le_bytes(self.0[8..12].try_into().unwrap())
    }
}

/// Errors that can occur while verifying a token
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The token is expired
    #[error("token is expired")]
    Expired,
    /// The token is unknown, revoked, or presented from the wrong host
    #[error("token is invalid")]
    Invalid,
}

#[derive(Default)]
struct SessionMaps {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

/// Token registry plus the bidirectional `user ↔ connection` mapping.
///
/// Both maps live behind blocking mutexes: every operation is a plain
/// map read or write, so there is nothing to suspend on.
#[derive(Default)]
pub struct Sessions {
    tokens: Mutex<HashMap<AuthToken, UserId>>,
    maps: Mutex<SessionMaps>,
}

/// Current unix time in seconds
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Clock went backwards")
        .as_secs() as u32
}

impl Sessions {
    pub fn new() -> Sessions {
        Sessions::default()
    }

    /// Mints and registers a token for the user at the provided host
    pub fn create_token(&self, host_addr: u32, user_id: UserId) -> AuthToken {
        let token = AuthToken::generate(host_addr, user_id, unix_now() + TOKEN_LIFETIME_SECS);
        self.tokens.lock().insert(token, user_id);
        token
    }

    /// Validates a presented token against the presenting host and the
    /// current time, returning the embedded user id
    pub fn validate_token(
        &self,
        token: &AuthToken,
        host_addr: u32,
        now: u32,
    ) -> Result<UserId, VerifyError> {
        if !self.tokens.lock().contains_key(token) {
            return Err(VerifyError::Invalid);
        }
        if token.host_addr() != host_addr {
            return Err(VerifyError::Invalid);
        }
        if now > token.expiration() {
            // Expired entries are dropped on sight
            self.tokens.lock().remove(token);
            return Err(VerifyError::Expired);
        }
        Ok(token.user_id())
    }

    /// Drops a token from the registry. Applying this twice leaves the
    /// same post-state as applying it once.
    pub fn invalidate_token(&self, token: &AuthToken) {
        self.tokens.lock().remove(token);
    }

    /// Drops every token minted for the user, used on password change
    pub fn invalidate_user_tokens(&self, user_id: UserId) {
        self.tokens
            .lock()
            .retain(|_, owner| *owner != user_id);
    }

    /// Associates a connection with an authenticated user, returning
    /// any connections already bound to that user so the caller can
    /// apply the duplicate-login policy (kick old, admit new)
    pub fn attach(&self, user_id: UserId, connection: ConnectionId) -> Vec<ConnectionId> {
        let maps = &mut *self.maps.lock();
        let previous: Vec<ConnectionId> = maps
            .by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        maps.by_user.entry(user_id).or_default().insert(connection);
        maps.by_connection.insert(connection, user_id);
        previous
    }

    /// Drops a connection from both direction maps, returning the user
    /// it was bound to
    pub fn detach(&self, connection: ConnectionId) -> Option<UserId> {
        let maps = &mut *self.maps.lock();
        let user_id = maps.by_connection.remove(&connection)?;
        if let Some(set) = maps.by_user.get_mut(&user_id) {
            set.remove(&connection);
            if set.is_empty() {
                maps.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }

    pub fn user_of(&self, connection: ConnectionId) -> Option<UserId> {
        self.maps.lock().by_connection.get(&connection).copied()
    }

    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.maps
            .lock()
            .by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Count of live authenticated sessions
    pub fn session_count(&self) -> usize {
        self.maps.lock().by_connection.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use uuid::Uuid;

    const LOCALHOST: u32 = 0x7F000001;

    #[test]
    fn test_token_layout() {
        let token = AuthToken::generate(LOCALHOST, 42, 1_000);
        assert_eq!(token.host_addr(), LOCALHOST);
        assert_eq!(token.user_id(), 42);
        assert_eq!(token.expiration(), 1_000);
        let restored = AuthToken::from_bytes(token.as_bytes()).unwrap();
        assert_eq!(restored, token);
    }

    #[test]
    fn test_validate_binds_host_and_time() {
        let sessions = Sessions::new();
        let token = sessions.create_token(LOCALHOST, 7);
        let now = unix_now();

        assert_eq!(sessions.validate_token(&token, LOCALHOST, now), Ok(7));
        // Wrong host is indistinguishable from an unknown token
        assert_eq!(
            sessions.validate_token(&token, 0x0A000001, now),
            Err(VerifyError::Invalid)
        );
        // Past the advertised expiration
        assert_eq!(
            sessions.validate_token(&token, LOCALHOST, token.expiration() + 1),
            Err(VerifyError::Expired)
        );
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let sessions = Sessions::new();
        let token = sessions.create_token(LOCALHOST, 7);
        sessions.invalidate_token(&token);
        sessions.invalidate_token(&token);
        assert_eq!(
            sessions.validate_token(&token, LOCALHOST, unix_now()),
            Err(VerifyError::Invalid)
        );
    }

    #[test]
    fn test_password_change_revokes_all_tokens() {
        let sessions = Sessions::new();
        let a = sessions.create_token(LOCALHOST, 7);
        let b = sessions.create_token(LOCALHOST, 7);
        let other = sessions.create_token(LOCALHOST, 8);

        sessions.invalidate_user_tokens(7);

        let now = unix_now();
        assert_eq!(
            sessions.validate_token(&a, LOCALHOST, now),
            Err(VerifyError::Invalid)
        );
        assert_eq!(
            sessions.validate_token(&b, LOCALHOST, now),
            Err(VerifyError::Invalid)
        );
        assert_eq!(sessions.validate_token(&other, LOCALHOST, now), Ok(8));
    }

    #[test]
    fn test_attach_reports_previous_connections() {
        let sessions = Sessions::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(sessions.attach(7, first).is_empty());
        let previous = sessions.attach(7, second);
        assert_eq!(previous, vec![first]);

        assert_eq!(sessions.detach(first), Some(7));
        assert_eq!(sessions.user_of(second), Some(7));
        assert_eq!(sessions.connections_of(7), vec![second]);
        // Detach of an unknown connection is a no-op
        assert_eq!(sessions.detach(first), None);
    }
}
