//! Packet body definitions, one module per protocol area.

pub mod auth;
pub mod game;
pub mod room;
pub mod search;

/// Declared string maxima, applied at encode time
pub const MAXIMUM_LOGIN_LENGTH: usize = 15;
pub const MAXIMUM_PASSWORD_LENGTH: usize = 31;
pub const MAXIMUM_PLAYER_NAME_LENGTH: usize = 31;
pub const MAXIMUM_GAME_NAME_LENGTH: usize = 31;
pub const MAXIMUM_MAP_NAME_LENGTH: usize = 63;
