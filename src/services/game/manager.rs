//! The game table and coordinator operations.
//!
//! Owns every live [`Game`] behind its own lock, assigns game ids,
//! publishes lifecycle events for the search index, and runs the
//! background reaper that aborts abandoned games and collects
//! finished ones.

use crate::database::{AuditLog, UserStore};
use crate::services::game::search::{GameAdvert, GameEvent};
use crate::services::game::standings::{self, StandingsReport};
use crate::services::game::{
    Game, GameError, GameSettings, GameSnapshot, GameState, COMPLETED_RETENTION,
};
use crate::utils::types::{GameId, RoomId, TeamIndex, UserId};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub type GameRef = Arc<RwLock<Game>>;

/// Interval between reaper passes
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// What finalizing a game decided, carried out of the game lock
enum Outcome {
    /// Agreement reached; these standings are authoritative
    Scored(StandingsReport),
    /// No agreement (or nothing reported); aborted for ranking
    NoResult,
}

pub struct Games {
    /// Stored value for the ID to give the next game
    next_id: AtomicU32,
    /// The map of games to their shared handles. The table lock covers
    /// insert and remove only; per-game state sits behind each game's
    /// own lock.
    games: RwLock<HashMap<GameId, GameRef>>,
    /// Which game each user is hosting
    hosting: Mutex<HashMap<UserId, GameId>>,
    /// Game ids whose scores have been applied. Guards score
    /// application against replays of the same game.
    scored: Mutex<HashSet<GameId>>,
    /// Lifecycle events consumed by the search index
    events: mpsc::UnboundedSender<GameEvent>,
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLog>,
}

impl Games {
    pub fn new(
        users: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLog>,
    ) -> (Games, mpsc::UnboundedReceiver<GameEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Games {
                next_id: AtomicU32::new(1),
                games: Default::default(),
                hosting: Default::default(),
                scored: Default::default(),
                events,
                users,
                audit,
            },
            receiver,
        )
    }

    /// Obtains the total count of games in the table
    pub fn total(&self) -> usize {
        self.games.read().len()
    }

    pub fn get_by_id(&self, game_id: GameId) -> Option<GameRef> {
        self.games.read().get(&game_id).cloned()
    }

    pub fn hosted_by(&self, user_id: UserId) -> Option<GameId> {
        self.hosting.lock().get(&user_id).copied()
    }

    /// The game a user currently occupies a slot in
    pub fn game_of(&self, user_id: UserId) -> Option<GameId> {
        let games = self.games.read();
        games
            .iter()
            .find(|(_, game)| {
                let game = game.read();
                !game.is_terminal() && game.player(user_id).is_some()
            })
            .map(|(game_id, _)| *game_id)
    }

    fn emit(&self, event: GameEvent) {
        // The receiver only goes away at shutdown
        let _ = self.events.send(event);
    }

    fn emit_changed(&self, game: &Game) {
        if game.state >= GameState::Waiting && !game.is_terminal() {
            self.emit(GameEvent::Changed(GameAdvert::of(game)));
        }
    }

    /// Creates a game in the Initializing state. The game stays
    /// invisible until its first player arrives.
    pub fn create(
        &self,
        host: UserId,
        room: RoomId,
        settings: GameSettings,
    ) -> Result<GameId, GameError> {
        let hosting = &mut *self.hosting.lock();
        if hosting.contains_key(&host) {
            return Err(GameError::AlreadyHosting);
        }

        let game_id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let game = Game::new(game_id, host, room, settings);
        self.games
            .write()
            .insert(game_id, Arc::new(RwLock::new(game)));
        hosting.insert(host, game_id);

        debug!("created game (GID: {}, host: {})", game_id, host);
        Ok(game_id)
    }

    /// Adds a player; the first player advertises the game
    pub fn add_player(&self, game_id: GameId, user_id: UserId) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let game = &mut *game.write();

        let was_hidden = game.state == GameState::Initializing;
        game.add_player(user_id)?;

        if was_hidden {
            self.emit(GameEvent::Added(GameAdvert::of(game)));
        } else {
            self.emit_changed(game);
        }
        Ok(())
    }

    /// Removes a player. A game whose roster empties is finished on
    /// the spot: aborted if it never ran, finalized from its reports
    /// if it did.
    pub async fn remove_player(&self, game_id: GameId, user_id: UserId) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let emptied = {
            let game = &mut *game.write();
            let emptied = game.remove_player(user_id)?;
            if !emptied {
                self.emit_changed(game);
            }
            emptied
        };

        if emptied {
            self.finish(game_id).await;
        }
        Ok(())
    }

    pub fn set_ready(&self, game_id: GameId, user_id: UserId, ready: bool) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let game = &mut *game.write();
        game.set_ready(user_id, ready)?;
        self.emit_changed(game);
        Ok(())
    }

    pub fn set_team(
        &self,
        game_id: GameId,
        user_id: UserId,
        team: TeamIndex,
    ) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let game = &mut *game.write();
        game.set_team(user_id, team)?;
        self.emit_changed(game);
        Ok(())
    }

    /// Records protocol activity from a player in a game
    pub fn touch(&self, game_id: GameId, user_id: UserId) {
        if let Some(game) = self.get_by_id(game_id) {
            game.write().touch(user_id);
        }
    }

    /// Host-requested start
    pub fn start(&self, game_id: GameId, requester: UserId) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let game = &mut *game.write();
        game.start(requester)?;
        info!(
            "game started (GID: {}, players: {})",
            game_id,
            game.players.len()
        );
        self.emit_changed(game);
        Ok(())
    }

    /// Host-requested end: stop accepting play, collect reports. When
    /// every roster member has already reported this finalizes
    /// immediately.
    pub async fn end(&self, game_id: GameId, requester: UserId) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let ready_to_finalize = {
            let game = &mut *game.write();
            if requester != game.host {
                return Err(GameError::NotHost);
            }
            game.begin_ending();
            !game.roster.is_empty() && game.reports.len() >= game.roster.len()
        };

        if ready_to_finalize {
            self.finish(game_id).await;
        }
        Ok(())
    }

    /// Host-requested removal of an advertised game that never ran
    pub async fn remove(&self, game_id: GameId, requester: UserId) -> Result<(), GameError> {
        {
            let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
            let game = &*game.read();
            if requester != game.host {
                return Err(GameError::NotHost);
            }
        }
        self.finish(game_id).await;
        Ok(())
    }

    /// Accepts one client's standings report. The first report moves a
    /// running game into Ending; once every roster member has reported
    /// the game finalizes.
    pub async fn submit_standings(
        &self,
        game_id: GameId,
        reporter: UserId,
        report: StandingsReport,
    ) -> Result<(), GameError> {
        let game = self.get_by_id(game_id).ok_or(GameError::UnknownGame)?;
        let ready_to_finalize = {
            let game = &mut *game.write();
            if !game.roster.contains(&reporter) {
                return Err(GameError::NotInGame);
            }
            match game.state {
                GameState::InProgress => game.begin_ending(),
                GameState::Ending => {}
                _ => return Err(GameError::NotJoinable),
            }
            game.touch(reporter);
            game.reports.push(report);
            game.reports.len() >= game.roster.len()
        };

        if ready_to_finalize {
            self.finish(game_id).await;
        }
        Ok(())
    }

    /// Finishes a game: reconciles the collected reports, applies
    /// scores when a result exists, leaves the terminal game in the
    /// table for the retention window. The outcome is decided under
    /// the game lock; store writes happen after it is released.
    async fn finish(&self, game_id: GameId) {
        let game = match self.get_by_id(game_id) {
            Some(game) => game,
            None => return,
        };

        let (room, host, outcome) = {
            let game = &mut *game.write();
            if game.is_terminal() {
                return;
            }

            let ran = game.started_at.is_some();
            let outcome = if ran {
                match standings::find_good_standings(game.roster.len(), &game.reports) {
                    Some(good) => Outcome::Scored(good.clone()),
                    None => Outcome::NoResult,
                }
            } else {
                Outcome::NoResult
            };

            match outcome {
                Outcome::Scored(_) => game.complete(),
                Outcome::NoResult => game.abort(),
            }
            (game.room, game.host, outcome)
        };

        self.hosting.lock().remove(&host);
        self.emit(GameEvent::Removed {
            room,
            game: game_id,
        });

        match outcome {
            Outcome::Scored(standings) => {
                // Mark scored first: replays of this game id become
                // no-ops even if the write below dies partway
                if !self.scored.lock().insert(game_id) {
                    debug!("scores for game {} already applied", game_id);
                    return;
                }
                if let Err(err) =
                    standings::apply_scores(&*self.users, &*self.audit, &standings).await
                {
                    warn!("score application for game {} failed: {}", game_id, err);
                } else {
                    info!("scores applied (GID: {})", game_id);
                }
            }
            Outcome::NoResult => {
                debug!(
                    "game finished without an authoritative result (GID: {})",
                    game_id
                );
            }
        }
    }

    /// One reaper pass: abort in-progress games whose players have all
    /// gone silent, and drop terminal games past the retention window
    pub fn reap(&self) {
        let now = Instant::now();

        let mut to_abort: Vec<GameId> = Vec::new();
        let mut to_collect: Vec<GameId> = Vec::new();
        {
            let games = self.games.read();
            for (game_id, game) in games.iter() {
                let game = game.read();
                if game.state == GameState::InProgress && game.all_inactive(now) {
                    to_abort.push(*game_id);
                }
                if let Some(finished_at) = game.finished_at {
                    if now.duration_since(finished_at) > COMPLETED_RETENTION {
                        to_collect.push(*game_id);
                    }
                }
            }
        }

        for game_id in to_abort {
            info!("aborting inactive game (GID: {})", game_id);
            if let Some(game) = self.get_by_id(game_id) {
                let (room, host) = {
                    let game = &mut *game.write();
                    game.abort();
                    (game.room, game.host)
                };
                self.hosting.lock().remove(&host);
                self.emit(GameEvent::Removed {
                    room,
                    game: game_id,
                });
            }
        }

        for game_id in to_collect {
            debug!("collecting finished game (GID: {})", game_id);
            self.games.write().remove(&game_id);
        }
    }

    /// Snapshots of the games advertised in a room, ordered by id
    pub fn snapshot_room(&self, room: RoomId) -> Vec<GameSnapshot> {
        let games = self.games.read();
        let mut snapshots: Vec<GameSnapshot> = games
            .values()
            .filter_map(|game| {
                let game = game.read();
                (game.room == room && game.state >= GameState::Waiting && !game.is_terminal())
                    .then(|| game.snapshot())
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }
}

/// Background loop driving the reaper
pub async fn run_reaper(games: Arc<Games>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        games.reap();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::entities::user::UserFlags;
    use crate::database::entities::NewUser;
    use crate::database::memory::{MemoryAuditLog, MemoryUserStore};
    use crate::services::game::standings::{PlayerStanding, TeamStanding};
    use crate::services::game::GameOptions;
    use crate::utils::hashing::PasswordScheme;

    fn settings() -> GameSettings {
        GameSettings {
            name: "test game".to_string(),
            map_name: "the desert".to_string(),
            game_type: 0,
            scoring_mode: 0,
            max_players: 8,
            team_game: true,
            options: GameOptions::empty(),
            password_hash: None,
            ranked: true,
        }
    }

    async fn seeded() -> (Arc<MemoryUserStore>, Games, Vec<UserId>) {
        let users = Arc::new(MemoryUserStore::default());
        let audit = Arc::new(MemoryAuditLog::default());
        let (games, _events) = Games::new(users.clone(), audit);

        let mut ids = Vec::new();
        for login in ["a", "b", "c"] {
            let user = users
                .insert(NewUser {
                    login: login.to_string(),
                    display_name: login.to_string(),
                    password_hash: String::new(),
                    salt: Vec::new(),
                    scheme: PasswordScheme::Bcrypt,
                    flags: UserFlags::empty(),
                })
                .await
                .unwrap();
            ids.push(user.id);
        }
        (users, games, ids)
    }

    fn report(ended: u16, ids: &[UserId], places: [u16; 3]) -> StandingsReport {
        StandingsReport {
            game_ended_code: ended,
            version: 1,
            number_of_players: 3,
            game_scoring: 0,
            players: vec![
                PlayerStanding {
                    user_id: ids[0],
                    team: 0,
                    points_killed: 4,
                    points_lost: 0,
                },
                PlayerStanding {
                    user_id: ids[1],
                    team: 1,
                    points_killed: 1,
                    points_lost: 2,
                },
                PlayerStanding {
                    user_id: ids[2],
                    team: 2,
                    points_killed: 2,
                    points_lost: 2,
                },
            ],
            teams: places.iter().map(|place| TeamStanding { place: *place }).collect(),
        }
    }

    async fn started_game(games: &Games, ids: &[UserId]) -> GameId {
        let game_id = games.create(ids[0], 1, settings()).unwrap();
        for (team, user_id) in ids.iter().enumerate() {
            games.add_player(game_id, *user_id).unwrap();
            games.set_team(game_id, *user_id, team as TeamIndex).unwrap();
            games.set_ready(game_id, *user_id, true).unwrap();
        }
        games.start(game_id, ids[0]).unwrap();
        game_id
    }

    #[tokio::test]
    async fn test_one_game_per_host() {
        let (_users, games, ids) = seeded().await;
        games.create(ids[0], 1, settings()).unwrap();
        assert_eq!(
            games.create(ids[0], 1, settings()),
            Err(GameError::AlreadyHosting)
        );
    }

    #[tokio::test]
    async fn test_agreeing_reports_score_the_game() {
        let (users, games, ids) = seeded().await;
        let game_id = started_game(&games, &ids).await;

        // A and B agree; C disagrees on the end code
        games
            .submit_standings(game_id, ids[0], report(0, &ids, [0, 1, 1]))
            .await
            .unwrap();
        games
            .submit_standings(game_id, ids[1], report(0, &ids, [0, 1, 1]))
            .await
            .unwrap();
        games
            .submit_standings(game_id, ids[2], report(1, &ids, [0, 2, 1]))
            .await
            .unwrap();

        let game = games.get_by_id(game_id).unwrap();
        assert_eq!(game.read().state, GameState::Completed);

        let winner = users.get_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(winner.ranked_score.wins, 1);
        assert_eq!(winner.ranked_score.points, 3);

        let loser = users.get_by_id(ids[1]).await.unwrap().unwrap();
        assert_eq!(loser.ranked_score.losses, 1);
        assert_eq!(loser.ranked_score.points, -1);
    }

    #[tokio::test]
    async fn test_disagreeing_reports_abort_without_scores() {
        let (users, games, ids) = seeded().await;
        let game_id = started_game(&games, &ids).await;

        for (index, user_id) in ids.iter().enumerate() {
            games
                .submit_standings(game_id, *user_id, report(index as u16, &ids, [0, 1, 1]))
                .await
                .unwrap();
        }

        let game = games.get_by_id(game_id).unwrap();
        assert_eq!(game.read().state, GameState::Aborted);

        for user_id in &ids {
            let user = users.get_by_id(*user_id).await.unwrap().unwrap();
            assert_eq!(user.ranked_score.games_played, 0);
            assert_eq!(user.ranked_score.points, 0);
        }
    }

    #[tokio::test]
    async fn test_scoring_is_idempotent_per_game() {
        let (users, games, ids) = seeded().await;
        let game_id = started_game(&games, &ids).await;

        for user_id in &ids {
            games
                .submit_standings(game_id, *user_id, report(0, &ids, [0, 1, 1]))
                .await
                .unwrap();
        }

        // Force a second finalize attempt on the already scored id
        games.scored.lock().insert(game_id);
        let before = users.get_by_id(ids[0]).await.unwrap().unwrap();
        games.finish(game_id).await;
        let after = users.get_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(before.ranked_score, after.ranked_score);
    }

    #[tokio::test]
    async fn test_reaper_collects_finished_games() {
        let (_users, games, ids) = seeded().await;
        let game_id = games.create(ids[0], 1, settings()).unwrap();
        games.add_player(game_id, ids[0]).unwrap();
        games.remove(game_id, ids[0]).await.unwrap();

        // Terminal but inside the retention window: still present
        games.reap();
        assert_eq!(games.total(), 1);

        // Age it out artificially
        {
            let game = games.get_by_id(game_id).unwrap();
            game.write().finished_at =
                Some(Instant::now() - COMPLETED_RETENTION - Duration::from_secs(1));
        }
        games.reap();
        assert_eq!(games.total(), 0);
    }
}
