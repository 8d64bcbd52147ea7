//! Live index over currently-advertised games.
//!
//! The coordinator publishes lifecycle events over a channel; this
//! service applies them in receipt order and answers multi-predicate
//! "find me a game like X" queries. The index is eventually consistent
//! with the coordinator by construction.

use crate::services::game::{Game, GameOptions};
use crate::utils::types::{GameId, RoomId, UserId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Cap on matches returned for one query
pub const MAXIMUM_SEARCH_RESPONSES: usize = 5;

/// The searchable projection of an advertised game
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameAdvert {
    pub id: GameId,
    pub room: RoomId,
    pub host: UserId,
    pub name: String,
    pub map_name: String,
    pub game_type: u16,
    pub scoring_mode: u16,
    pub unit_trading: bool,
    pub veterans: bool,
    pub teams: bool,
    pub alliances: bool,
    pub enemy_visibility: bool,
    pub player_count: u16,
    pub max_players: u16,
    pub in_progress: bool,
}

impl GameAdvert {
    /// Projects a game into its advertised form
    pub fn of(game: &Game) -> GameAdvert {
        let settings = &game.settings;
        GameAdvert {
            id: game.id,
            room: game.room,
            host: game.host,
            name: settings.name.clone(),
            map_name: settings.map_name.clone(),
            game_type: settings.game_type,
            scoring_mode: settings.scoring_mode,
            unit_trading: settings.options.contains(GameOptions::ALLOW_UNIT_TRADING),
            veterans: settings.options.contains(GameOptions::ALLOW_VETERANS),
            teams: settings.team_game,
            alliances: settings.options.contains(GameOptions::ALLOW_ALLIANCES),
            enemy_visibility: !settings.options.contains(GameOptions::LIMITED_VISIBILITY),
            player_count: game.players.len() as u16,
            max_players: settings.max_players,
            in_progress: game.state > super::GameState::Waiting,
        }
    }
}

/// Coordinator lifecycle events feeding the index
#[derive(Debug, Clone)]
pub enum GameEvent {
    Added(GameAdvert),
    Changed(GameAdvert),
    Removed { room: RoomId, game: GameId },
}

/// A game query: every present predicate must hold, absent predicates
/// match anything
#[derive(Debug, Clone, Default)]
pub struct GameQuery {
    pub game_type: Option<u16>,
    pub scoring_mode: Option<u16>,
    pub unit_trading: Option<bool>,
    pub veterans: Option<bool>,
    pub teams: Option<bool>,
    pub alliances: Option<bool>,
    pub enemy_visibility: Option<bool>,
    /// Substring match against the game name
    pub game_name: Option<String>,
    /// Substring match against the map name
    pub map_name: Option<String>,
}

impl GameQuery {
    fn matches(&self, advert: &GameAdvert) -> bool {
        fn check<T: PartialEq>(predicate: &Option<T>, value: T) -> bool {
            match predicate {
                Some(expected) => *expected == value,
                None => true,
            }
        }

        fn contains(predicate: &Option<String>, value: &str) -> bool {
            match predicate {
                Some(needle) => value.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()),
                None => true,
            }
        }

        check(&self.game_type, advert.game_type)
            && check(&self.scoring_mode, advert.scoring_mode)
            && check(&self.unit_trading, advert.unit_trading)
            && check(&self.veterans, advert.veterans)
            && check(&self.teams, advert.teams)
            && check(&self.alliances, advert.alliances)
            && check(&self.enemy_visibility, advert.enemy_visibility)
            && contains(&self.game_name, &advert.name)
            && contains(&self.map_name, &advert.map_name)
    }
}

#[derive(Default)]
struct SearchState {
    /// Adverts keyed by room then game
    by_room: HashMap<RoomId, HashMap<GameId, IndexedAdvert>>,
    /// Receipt counter providing the recency order
    seq: u64,
}

struct IndexedAdvert {
    advert: GameAdvert,
    seq: u64,
}

/// The search index itself: one mutex, events applied in order
#[derive(Default)]
pub struct GameSearch {
    state: Mutex<SearchState>,
}

impl GameSearch {
    pub fn new() -> GameSearch {
        GameSearch::default()
    }

    /// Applies one coordinator event
    pub fn apply(&self, event: GameEvent) {
        let state = &mut *self.state.lock();
        match event {
            GameEvent::Added(advert) | GameEvent::Changed(advert) => {
                state.seq += 1;
                let seq = state.seq;
                state
                    .by_room
                    .entry(advert.room)
                    .or_default()
                    .insert(advert.id, IndexedAdvert { advert, seq });
            }
            GameEvent::Removed { room, game } => {
                if let Some(games) = state.by_room.get_mut(&room) {
                    games.remove(&game);
                    if games.is_empty() {
                        state.by_room.remove(&room);
                    }
                }
            }
        }
    }

    /// Answers a query with at most [`MAXIMUM_SEARCH_RESPONSES`]
    /// matches, most recently updated first
    pub fn query(&self, query: &GameQuery) -> Vec<GameAdvert> {
        let state = self.state.lock();
        let mut matches: Vec<&IndexedAdvert> = state
            .by_room
            .values()
            .flat_map(|games| games.values())
            .filter(|indexed| query.matches(&indexed.advert))
            .collect();
        matches.sort_by(|a, b| b.seq.cmp(&a.seq));
        matches
            .into_iter()
            .take(MAXIMUM_SEARCH_RESPONSES)
            .map(|indexed| indexed.advert.clone())
            .collect()
    }

    /// Number of adverts currently indexed
    pub fn advert_count(&self) -> usize {
        self.state
            .lock()
            .by_room
            .values()
            .map(|games| games.len())
            .sum()
    }

}

#[cfg(test)]
mod test {
    use super::*;

    fn advert(id: GameId, room: RoomId, name: &str) -> GameAdvert {
        GameAdvert {
            id,
            room,
            host: 1,
            name: name.to_string(),
            map_name: "creep on the borderlands".to_string(),
            game_type: 0,
            scoring_mode: 0,
            unit_trading: false,
            veterans: false,
            teams: false,
            alliances: true,
            enemy_visibility: true,
            player_count: 2,
            max_players: 8,
            in_progress: false,
        }
    }

    #[test]
    fn test_predicates_intersect() {
        let search = GameSearch::new();
        let mut a = advert(1, 1, "sunday bloodbath");
        a.unit_trading = true;
        a.game_type = 3;
        let mut b = advert(2, 1, "casual game");
        b.game_type = 3;
        search.apply(GameEvent::Added(a));
        search.apply(GameEvent::Added(b));

        let query = GameQuery {
            game_type: Some(3),
            unit_trading: Some(true),
            ..Default::default()
        };
        let matches = search.query(&query);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, 1);
    }

    #[test]
    fn test_name_substring_match() {
        let search = GameSearch::new();
        search.apply(GameEvent::Added(advert(1, 1, "Sunday BLOODBATH")));
        let query = GameQuery {
            game_name: Some("bloodbath".to_string()),
            ..Default::default()
        };
        assert_eq!(search.query(&query).len(), 1);
    }

    #[test]
    fn test_results_capped_and_recent_first() {
        let search = GameSearch::new();
        for id in 1..=8 {
            search.apply(GameEvent::Added(advert(id, 1, "game")));
        }
        let matches = search.query(&GameQuery::default());
        assert_eq!(matches.len(), MAXIMUM_SEARCH_RESPONSES);
        // Most recently indexed first
        assert_eq!(matches[0].id, 8);
        assert_eq!(matches[4].id, 4);
    }

    #[test]
    fn test_removed_games_leave_index() {
        let search = GameSearch::new();
        search.apply(GameEvent::Added(advert(1, 1, "game")));
        search.apply(GameEvent::Removed { room: 1, game: 1 });
        assert_eq!(search.advert_count(), 0);
        assert!(search.query(&GameQuery::default()).is_empty());
    }

    #[test]
    fn test_changed_updates_in_place() {
        let search = GameSearch::new();
        search.apply(GameEvent::Added(advert(1, 1, "game")));
        let mut updated = advert(1, 1, "game");
        updated.player_count = 5;
        search.apply(GameEvent::Changed(updated));
        assert_eq!(search.advert_count(), 1);
        let matches = search.query(&GameQuery::default());
        assert_eq!(matches[0].player_count, 5);
    }
}
