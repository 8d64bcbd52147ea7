//! Module for type aliases that help to better identify field types

pub type UserId = u32;
pub type OrderId = u32;
pub type RoomId = u16;
pub type GameId = u32;
pub type TeamIndex = u16;

/// Unique identifier assigned to every accepted TCP connection
pub type ConnectionId = uuid::Uuid;
