pub mod game;
pub mod orders;
pub mod ranking;
pub mod rooms;
pub mod sessions;
