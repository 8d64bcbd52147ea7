//! Opcode space for the metaserver protocol.
//!
//! The space is partitioned: 0–99 server→client, 100–199 client→server,
//! 200 and above flow in either direction.

/// First opcode reserved for client→server packets
pub const FIRST_CLIENT_OPCODE: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    // Server packets (0-99)
    RoomList = 0,
    PlayerList = 1,
    GameList = 2,
    ServerMessage = 3,
    PasswordChallenge = 6,
    UserSuccessfulLogin = 7,
    RoomLoginSuccessful = 9,
    MessageOfTheDay = 10,
    PlayerInfo = 17,

    // Client packets (100-199)
    Login = 100,
    RoomLogin = 101,
    Logout = 102,
    SetPlayerData = 103,
    CreateGame = 104,
    RemoveGame = 105,
    ChangeRoom = 106,
    GameScore = 112,
    StartGame = 114,
    JoinGame = 115,
    LeaveGame = 116,
    SetPlayerReady = 117,
    SetPlayerTeam = 118,
    EndGame = 119,
    GameSearchQuery = 120,
    ChangePassword = 121,
    // Admin surface (web listener only)
    Shutdown = 130,

    // Bidirectional packets (200+)
    RoomBroadcast = 200,
    DirectedData = 201,
    Keepalive = 202,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Opcode> {
        Some(match value {
            0 => Opcode::RoomList,
            1 => Opcode::PlayerList,
            2 => Opcode::GameList,
            3 => Opcode::ServerMessage,
            6 => Opcode::PasswordChallenge,
            7 => Opcode::UserSuccessfulLogin,
            9 => Opcode::RoomLoginSuccessful,
            10 => Opcode::MessageOfTheDay,
            17 => Opcode::PlayerInfo,
            100 => Opcode::Login,
            101 => Opcode::RoomLogin,
            102 => Opcode::Logout,
            103 => Opcode::SetPlayerData,
            104 => Opcode::CreateGame,
            105 => Opcode::RemoveGame,
            106 => Opcode::ChangeRoom,
            112 => Opcode::GameScore,
            114 => Opcode::StartGame,
            115 => Opcode::JoinGame,
            116 => Opcode::LeaveGame,
            117 => Opcode::SetPlayerReady,
            118 => Opcode::SetPlayerTeam,
            119 => Opcode::EndGame,
            120 => Opcode::GameSearchQuery,
            121 => Opcode::ChangePassword,
            130 => Opcode::Shutdown,
            200 => Opcode::RoomBroadcast,
            201 => Opcode::DirectedData,
            202 => Opcode::Keepalive,
            _ => return None,
        })
    }

    /// Whether a client is allowed to send this opcode
    pub fn client_sendable(&self) -> bool {
        (*self as u16) >= FIRST_CLIENT_OPCODE
    }
}

/// Result and error codes carried by `SERVER_MESSAGE` packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageCode {
    SyntaxError = 0,
    LoginFailedGamesNotAllowed = 1,
    LoginFailedInvalidVersion = 2,
    LoginFailedBadUserOrPassword = 3,
    UserNotLoggedIn = 4,
    BadMetaserverVersion = 5,
    UserAlreadyLoggedIn = 6,
    UnknownGameType = 7,
    LoginSuccessful = 8,
    LogoutSuccessful = 9,
    PlayerNotInRoom = 10,
    GameAlreadyExists = 11,
    AccountAlreadyLoggedIn = 12,
    RoomFull = 13,
    AccountLocked = 14,
    MetaserverNotSupported = 15,
    CasteRestricted = 16,
    GameFull = 17,
    NotInGame = 18,
    NotGameHost = 19,
    GameNotWaiting = 20,
    InternalError = 21,
    GameNotReady = 22,
    GameNotFound = 23,
}

impl MessageCode {
    #[allow(unused)]
    pub fn from_u16(value: u16) -> Option<MessageCode> {
        Some(match value {
            0 => MessageCode::SyntaxError,
            1 => MessageCode::LoginFailedGamesNotAllowed,
            2 => MessageCode::LoginFailedInvalidVersion,
            3 => MessageCode::LoginFailedBadUserOrPassword,
            4 => MessageCode::UserNotLoggedIn,
            5 => MessageCode::BadMetaserverVersion,
            6 => MessageCode::UserAlreadyLoggedIn,
            7 => MessageCode::UnknownGameType,
            8 => MessageCode::LoginSuccessful,
            9 => MessageCode::LogoutSuccessful,
            10 => MessageCode::PlayerNotInRoom,
            11 => MessageCode::GameAlreadyExists,
            12 => MessageCode::AccountAlreadyLoggedIn,
            13 => MessageCode::RoomFull,
            14 => MessageCode::AccountLocked,
            15 => MessageCode::MetaserverNotSupported,
            16 => MessageCode::CasteRestricted,
            17 => MessageCode::GameFull,
            18 => MessageCode::NotInGame,
            19 => MessageCode::NotGameHost,
            20 => MessageCode::GameNotWaiting,
            21 => MessageCode::InternalError,
            22 => MessageCode::GameNotReady,
            23 => MessageCode::GameNotFound,
            _ => return None,
        })
    }

    /// Human readable message text sent alongside the code
    pub fn message(&self) -> &'static str {
        match self {
            MessageCode::SyntaxError => "Syntax error (unrecognized command).",
            MessageCode::LoginFailedGamesNotAllowed => {
                "Login failed (Games not allowed at this time)."
            }
            MessageCode::LoginFailedInvalidVersion => {
                "Login failed (Invalid Game Version number)."
            }
            MessageCode::LoginFailedBadUserOrPassword => "Login failed (Bad user or Password).",
            MessageCode::UserNotLoggedIn => "User not logged in.",
            MessageCode::BadMetaserverVersion => "Bad metaserver version.",
            MessageCode::UserAlreadyLoggedIn => "User already logged in!",
            MessageCode::UnknownGameType => "Unknown game type!",
            MessageCode::LoginSuccessful => "User logged in.",
            MessageCode::LogoutSuccessful => "User logged out.",
            MessageCode::PlayerNotInRoom => "Player not in a room!",
            MessageCode::GameAlreadyExists => "You already created a game!",
            MessageCode::AccountAlreadyLoggedIn => "This account is already logged in!",
            MessageCode::RoomFull => "The desired room is full!",
            MessageCode::AccountLocked => "Your account has been locked",
            MessageCode::MetaserverNotSupported => {
                "The game server for your product has been shutdown"
            }
            MessageCode::CasteRestricted => "Your caste is not allowed in that room!",
            MessageCode::GameFull => "The desired game is full!",
            MessageCode::NotInGame => "You are not in that game!",
            MessageCode::NotGameHost => "Only the game host can do that!",
            MessageCode::GameNotWaiting => "The game has already started!",
            MessageCode::InternalError => "Internal server error.",
            MessageCode::GameNotReady => "The game is not ready to start!",
            MessageCode::GameNotFound => "That game no longer exists.",
        }
    }
}
