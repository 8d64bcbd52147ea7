//! Authentication packet bodies.

use crate::packet::wire::{self, WireResult};
use crate::packet::PacketBody;
use crate::services::sessions::{AuthToken, TOKEN_SIZE};
use bytes::{Bytes, BytesMut};

use super::{MAXIMUM_LOGIN_LENGTH, MAXIMUM_PASSWORD_LENGTH};

/// Client login request
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
    /// Game-type flags the client reports for itself, matched against
    /// room support masks at admission
    pub client_flags: u32,
    /// Client build, kept for the audit trail
    pub build_version: u16,
    pub login: String,
    pub password: String,
}

impl PacketBody for LoginRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.client_flags);
        wire::write_u16(dst, self.build_version);
        wire::write_string(dst, &self.login, MAXIMUM_LOGIN_LENGTH);
        wire::write_string(dst, &self.password, MAXIMUM_PASSWORD_LENGTH);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(LoginRequest {
            client_flags: wire::read_u32(src)?,
            build_version: wire::read_u16(src)?,
            login: wire::read_string(src)?,
            password: wire::read_string(src)?,
        })
    }
}

/// Successful login response carrying the bearer token
#[derive(Debug, Clone, PartialEq)]
pub struct LoginSuccess {
    pub user_id: u32,
    /// Order membership, zero when unaffiliated
    pub order: u32,
    pub token: AuthToken,
}

impl PacketBody for LoginSuccess {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u32(dst, self.user_id);
        wire::write_u32(dst, self.order);
        wire::write_bytes(dst, self.token.as_bytes());
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        let user_id = wire::read_u32(src)?;
        let order = wire::read_u32(src)?;
        let raw = wire::read_bytes(src, TOKEN_SIZE)?;
        let token = AuthToken::from_bytes(&raw)
            .ok_or(crate::packet::wire::WireError::InvalidValue("token"))?;
        Ok(LoginSuccess {
            user_id,
            order,
            token,
        })
    }
}

/// Password change, issued over an authenticated connection
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePasswordRequest {
    pub new_password: String,
}

impl PacketBody for ChangePasswordRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_string(dst, &self.new_password, MAXIMUM_PASSWORD_LENGTH);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(ChangePasswordRequest {
            new_password: wire::read_string(src)?,
        })
    }
}

/// Display-name update for the authenticated user
#[derive(Debug, Clone, PartialEq)]
pub struct SetPlayerDataRequest {
    pub display_name: String,
}

impl PacketBody for SetPlayerDataRequest {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_string(dst, &self.display_name, super::MAXIMUM_PLAYER_NAME_LENGTH);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(SetPlayerDataRequest {
            display_name: wire::read_string(src)?,
        })
    }
}

/// SERVER_MESSAGE body: a result code plus its display text
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub code: u16,
    pub text: String,
}

impl PacketBody for ServerMessage {
    fn write(&self, dst: &mut BytesMut) {
        wire::write_u16(dst, self.code);
        wire::write_string(dst, &self.text, 255);
    }

    fn read(src: &mut Bytes) -> WireResult<Self> {
        Ok(ServerMessage {
            code: wire::read_u16(src)?,
            text: wire::read_string(src)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{opcodes::Opcode, Packet};

    #[test]
    fn test_login_round_trip() {
        let body = LoginRequest {
            client_flags: 0x2,
            build_version: 417,
            login: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let packet = Packet::of(Opcode::Login, &body);
        let decoded: LoginRequest = packet.deserialize().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_login_success_round_trip() {
        let body = LoginSuccess {
            user_id: 7,
            order: 0,
            token: AuthToken::generate(0x7F000001, 7, 1_000),
        };
        let packet = Packet::of(Opcode::UserSuccessfulLogin, &body);
        let decoded: LoginSuccess = packet.deserialize().unwrap();
        assert_eq!(decoded, body);
    }
}
