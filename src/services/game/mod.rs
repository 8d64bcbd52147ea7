//! Game lifecycle state machine.
//!
//! Games are advertised and run between clients directly; the
//! metaserver only tracks their lifecycle, gates their start on the
//! readiness invariants, and resolves their final standings.

use crate::utils::types::{GameId, RoomId, TeamIndex, UserId};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

pub mod manager;
pub mod search;
pub mod standings;

/// How long a completed game lingers before it is collected
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Heartbeat silence from every player that aborts an in-progress game
pub const INACTIVITY_LIMIT: Duration = Duration::from_secs(30 * 60);

/// Lifecycle states. Transitions are monotonic: a game never moves to
/// a state with a lower ordinal except into Aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum GameState {
    /// Created by the host, not yet visible
    Initializing,
    /// Advertised, collecting players
    Waiting,
    /// Start accepted, clients handing off
    Starting,
    InProgress,
    /// Collecting standings reports
    Ending,
    Completed,
    Aborted,
}

bitflags! {
    /// Option bits carried in game settings. The search predicates
    /// are derived from these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
    pub struct GameOptions: u32 {
        const RANDOM_ENDGAME_COUNTDOWN = 1 << 0;
        const ALLOW_MULTIPLAYER_TEAMS = 1 << 1;
        const LIMITED_VISIBILITY = 1 << 2;
        const NO_INGAME_RANKING = 1 << 3;
        const ALLOW_UNIT_TRADING = 1 << 4;
        const ALLOW_VETERANS = 1 << 5;
        const ALLOW_ALLIANCES = 1 << 13;
        const ALLOW_OVERHEAD_MAP = 1 << 14;
        const ORDER_GAME = 1 << 15;
        const DEATHMATCH = 1 << 20;
    }
}

/// Host-supplied parameters fixed at creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSettings {
    pub name: String,
    pub map_name: String,
    /// Scoring variant (body count, capture the flag, ...)
    pub game_type: u16,
    pub scoring_mode: u16,
    pub max_players: u16,
    pub team_game: bool,
    pub options: GameOptions,
    /// Present when the game is password protected
    #[serde(skip)]
    pub password_hash: Option<String>,
    /// Whether results feed the ranking engine
    pub ranked: bool,
}

/// A player slot inside a game
#[derive(Debug, Clone)]
pub struct GamePlayer {
    pub user_id: UserId,
    pub team: Option<TeamIndex>,
    pub ready: bool,
    pub last_active: Instant,
}

impl GamePlayer {
    fn new(user_id: UserId) -> GamePlayer {
        GamePlayer {
            user_id,
            team: None,
            ready: false,
            last_active: Instant::now(),
        }
    }
}

/// Reasons a start request is refused. The display form is the
/// human-readable reason returned to the host.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("The game has already started!")]
    NotWaiting,
    #[error("There is nobody in the game!")]
    NoPlayers,
    #[error("Player {0} not ready")]
    PlayerNotReady(UserId),
    #[error("Player {0} has no team assigned")]
    PlayerWithoutTeam(UserId),
    #[error("Teams are uneven")]
    UnevenTeams,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("no such game")]
    UnknownGame,
    #[error("the desired game is full")]
    GameFull,
    #[error("the game is no longer accepting players")]
    NotJoinable,
    #[error("player is not in the game")]
    NotInGame,
    #[error("only the host can do that")]
    NotHost,
    #[error("the host already has a game")]
    AlreadyHosting,
    #[error(transparent)]
    Start(#[from] StartError),
}

/// An advertised or in-progress match
#[derive(Debug)]
pub struct Game {
    pub id: GameId,
    pub host: UserId,
    pub room: RoomId,
    pub state: GameState,
    pub settings: GameSettings,
    pub players: Vec<GamePlayer>,
    /// Player ids captured when the game started; the denominator for
    /// standings reconciliation
    pub roster: Vec<UserId>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// When the game reached a terminal state, for collection
    pub finished_at: Option<Instant>,
    /// Standings reports in receipt order
    pub reports: Vec<standings::StandingsReport>,
}

impl Game {
    pub fn new(id: GameId, host: UserId, room: RoomId, settings: GameSettings) -> Game {
        Game {
            id,
            host,
            room,
            state: GameState::Initializing,
            settings,
            players: Vec::new(),
            roster: Vec::new(),
            started_at: None,
            ended_at: None,
            finished_at: None,
            reports: Vec::new(),
        }
    }

    pub fn player(&self, user_id: UserId) -> Option<&GamePlayer> {
        self.players.iter().find(|player| player.user_id == user_id)
    }

    fn player_mut(&mut self, user_id: UserId) -> Option<&mut GamePlayer> {
        self.players
            .iter_mut()
            .find(|player| player.user_id == user_id)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, GameState::Completed | GameState::Aborted)
    }

    /// Adds a player. The first player moves the game from
    /// Initializing to Waiting, which is the point it becomes visible.
    pub fn add_player(&mut self, user_id: UserId) -> Result<(), GameError> {
        match self.state {
            GameState::Initializing | GameState::Waiting => {}
            _ => return Err(GameError::NotJoinable),
        }
        if self.players.len() >= self.settings.max_players as usize {
            return Err(GameError::GameFull);
        }
        if self.player(user_id).is_some() {
            // Re-join of a present player refreshes activity only
            self.touch(user_id);
            return Ok(());
        }
        self.players.push(GamePlayer::new(user_id));
        if self.state == GameState::Initializing {
            self.state = GameState::Waiting;
        }
        Ok(())
    }

    /// Removes a player, reporting whether the roster is now empty
    pub fn remove_player(&mut self, user_id: UserId) -> Result<bool, GameError> {
        let index = self
            .players
            .iter()
            .position(|player| player.user_id == user_id)
            .ok_or(GameError::NotInGame)?;
        self.players.remove(index);
        Ok(self.players.is_empty())
    }

    pub fn set_ready(&mut self, user_id: UserId, ready: bool) -> Result<(), GameError> {
        let player = self.player_mut(user_id).ok_or(GameError::NotInGame)?;
        player.ready = ready;
        player.last_active = Instant::now();
        Ok(())
    }

    pub fn set_team(&mut self, user_id: UserId, team: TeamIndex) -> Result<(), GameError> {
        let player = self.player_mut(user_id).ok_or(GameError::NotInGame)?;
        player.team = Some(team);
        player.last_active = Instant::now();
        Ok(())
    }

    /// Records activity from a player, feeding the inactivity reaper
    pub fn touch(&mut self, user_id: UserId) {
        if let Some(player) = self.player_mut(user_id) {
            player.last_active = Instant::now();
        }
    }

    /// Checks every readiness invariant without changing state
    pub fn check_ready(&self) -> Result<(), StartError> {
        if self.state != GameState::Waiting {
            return Err(StartError::NotWaiting);
        }
        if self.players.is_empty() {
            return Err(StartError::NoPlayers);
        }
        for player in &self.players {
            if !player.ready {
                return Err(StartError::PlayerNotReady(player.user_id));
            }
        }
        if self.settings.team_game {
            let mut team_sizes: HashMap<TeamIndex, usize> = HashMap::new();
            for player in &self.players {
                match player.team {
                    Some(team) => *team_sizes.entry(team).or_default() += 1,
                    None => return Err(StartError::PlayerWithoutTeam(player.user_id)),
                }
            }
            let mut sizes = team_sizes.values();
            let first = sizes.next().copied().unwrap_or(0);
            if sizes.any(|size| *size != first) {
                return Err(StartError::UnevenTeams);
            }
        }
        Ok(())
    }

    /// Host-requested start. On success the game runs Starting →
    /// InProgress; on failure it stays in Waiting with nothing changed.
    pub fn start(&mut self, requester: UserId) -> Result<(), GameError> {
        if requester != self.host {
            return Err(GameError::NotHost);
        }
        self.check_ready()?;
        self.state = GameState::Starting;
        // The handoff is between the clients themselves, nothing to
        // wait for on the server side
        self.state = GameState::InProgress;
        self.started_at = Some(Utc::now());
        self.roster = self.players.iter().map(|player| player.user_id).collect();
        for player in self.players.iter_mut() {
            player.last_active = Instant::now();
        }
        Ok(())
    }

    /// Moves a running game into the report-collecting phase
    pub fn begin_ending(&mut self) {
        if matches!(self.state, GameState::InProgress | GameState::Starting) {
            self.state = GameState::Ending;
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self) {
        self.state = GameState::Completed;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self.finished_at = Some(Instant::now());
    }

    pub fn abort(&mut self) {
        self.state = GameState::Aborted;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self.finished_at = Some(Instant::now());
    }

    /// Whether every player has been silent past the inactivity limit
    pub fn all_inactive(&self, now: Instant) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|player| now.duration_since(player.last_active) > INACTIVITY_LIMIT)
    }
}

/// Serializable snapshot of a game for list packets and the web
/// surface
#[derive(Debug, Clone, Serialize)]
pub struct GameSnapshot {
    pub id: GameId,
    pub room: RoomId,
    pub host: UserId,
    pub state: GameState,
    pub name: String,
    pub map_name: String,
    pub player_count: u16,
    pub max_players: u16,
}

impl Game {
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            id: self.id,
            room: self.room,
            host: self.host,
            state: self.state,
            name: self.settings.name.clone(),
            map_name: self.settings.map_name.clone(),
            player_count: self.players.len() as u16,
            max_players: self.settings.max_players,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings(team_game: bool, max_players: u16) -> GameSettings {
        GameSettings {
            name: "test game".to_string(),
            map_name: "the desert".to_string(),
            game_type: 0,
            scoring_mode: 0,
            max_players,
            team_game,
            options: GameOptions::ALLOW_ALLIANCES,
            password_hash: None,
            ranked: true,
        }
    }

    #[test]
    fn test_first_player_advertises() {
        let mut game = Game::new(1, 10, 1, settings(false, 4));
        assert_eq!(game.state, GameState::Initializing);
        game.add_player(10).unwrap();
        assert_eq!(game.state, GameState::Waiting);
    }

    #[test]
    fn test_player_cap() {
        let mut game = Game::new(1, 10, 1, settings(false, 2));
        game.add_player(10).unwrap();
        game.add_player(11).unwrap();
        assert_eq!(game.add_player(12), Err(GameError::GameFull));
    }

    #[test]
    fn test_start_readiness_gate() {
        let mut game = Game::new(1, 10, 1, settings(true, 4));
        for user_id in [10, 11, 12, 13] {
            game.add_player(user_id).unwrap();
        }
        game.set_team(10, 0).unwrap();
        game.set_team(11, 0).unwrap();
        game.set_team(12, 1).unwrap();
        game.set_team(13, 1).unwrap();
        for user_id in [10, 11, 12] {
            game.set_ready(user_id, true).unwrap();
        }

        // Three of four ready: rejected, still waiting
        let rejected = game.start(10);
        assert_eq!(
            rejected,
            Err(GameError::Start(StartError::PlayerNotReady(13)))
        );
        assert_eq!(game.state, GameState::Waiting);

        game.set_ready(13, true).unwrap();
        game.start(10).unwrap();
        assert_eq!(game.state, GameState::InProgress);
    }

    #[test]
    fn test_uneven_teams_rejected() {
        let mut game = Game::new(1, 10, 1, settings(true, 4));
        for user_id in [10, 11, 12] {
            game.add_player(user_id).unwrap();
            game.set_ready(user_id, true).unwrap();
        }
        game.set_team(10, 0).unwrap();
        game.set_team(11, 0).unwrap();
        game.set_team(12, 1).unwrap();

        assert_eq!(
            game.start(10),
            Err(GameError::Start(StartError::UnevenTeams))
        );
    }

    #[test]
    fn test_only_host_starts() {
        let mut game = Game::new(1, 10, 1, settings(false, 4));
        game.add_player(10).unwrap();
        game.set_ready(10, true).unwrap();
        assert_eq!(game.start(11), Err(GameError::NotHost));
        game.start(10).unwrap();
    }

    #[test]
    fn test_no_return_to_waiting() {
        let mut game = Game::new(1, 10, 1, settings(false, 4));
        game.add_player(10).unwrap();
        game.set_ready(10, true).unwrap();
        game.start(10).unwrap();
        // Joining after start is refused; the lifecycle cannot move
        // backwards
        assert_eq!(game.add_player(11), Err(GameError::NotJoinable));
        game.begin_ending();
        assert_eq!(game.state, GameState::Ending);
        game.complete();
        assert_eq!(game.state, GameState::Completed);
    }

    #[test]
    fn test_all_inactive() {
        let mut game = Game::new(1, 10, 1, settings(false, 4));
        game.add_player(10).unwrap();
        let now = Instant::now();
        assert!(!game.all_inactive(now));
        assert!(game.all_inactive(now + INACTIVITY_LIMIT + Duration::from_secs(1)));
    }
}
