//! Batched caste recomputation.
//!
//! Every couple of hours (and on demand) the whole ranked population
//! is ordered and re-bucketed: twelve normal castes cut by population
//! percentile, with the fixed-occupancy named tiers drawn off the top
//! of the stream. Write-back happens in bounded batches with a
//! cooperative yield between them so live traffic is never starved.
//! The run derives everything from current store state, so a run
//! interrupted by a restart simply happens again at the next trigger.

use crate::database::entities::{Caste, User};
use crate::database::{StoreResult, UserStore};
use crate::utils::types::UserId;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Interval between scheduled recomputations
pub const RANKING_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Store operations per batch before yielding
pub const MAXIMUM_DATABASE_OPERATIONS_PER_CALL: usize = 1000;

/// Users at or below this many ranked games are pinned to the bottom
/// castes regardless of points
pub const PROVISIONAL_GAMES_LIMIT: u32 = 3;

/// Population share of each normal caste, lowest caste first. The
/// bottom three castes hold only provisional players, so their share
/// of the ranked population is zero.
pub const RANK_PERCENTAGES: [f64; 12] = [
    0.00, 0.00, 0.00, 0.16, 0.15, 0.14, 0.12, 0.11, 0.10, 0.09, 0.07, 0.06,
];

pub const COMET_PLAYER_COUNT: usize = 1;
pub const SUN_PLAYER_COUNT: usize = 1;
pub const ECLIPSED_SUN_PLAYER_COUNT: usize = 1;
pub const MOON_PLAYER_COUNT: usize = 2;
pub const ECLIPSED_MOON_PLAYER_COUNT: usize = 3;

/// One atomic snapshot of the computed breakpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CasteBreakpoints {
    /// Minimum points to sit in each normal caste; zero for castes cut
    /// purely by games played
    pub normal_caste_breakpoints: [i32; 12],
    pub comet_player_ids: Vec<UserId>,
    pub sun_player_ids: Vec<UserId>,
    pub eclipsed_sun_player_ids: Vec<UserId>,
    pub moon_player_ids: Vec<UserId>,
    pub eclipsed_moon_player_ids: Vec<UserId>,
}

/// Outcome counters for one recomputation
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RankingSummary {
    pub users_ranked: usize,
    pub users_pinned: usize,
    pub castes_changed: usize,
}

/// The ranking engine. Holds the published snapshot for read-only
/// consumers.
pub struct Ranking {
    users: Arc<dyn UserStore>,
    snapshot: RwLock<Arc<CasteBreakpoints>>,
}

/// Caste for a provisional player, cut purely by games played
fn provisional_caste(games_played: u32) -> Caste {
    match games_played {
        0 | 1 => Caste::Dagger,
        2 => Caste::DaggerWithHilt,
        _ => Caste::KrisKnife,
    }
}

/// Best-first comparison: points, then games played
fn compare_rankings(a: &User, b: &User) -> Ordering {
    b.ranked_score
        .points
        .cmp(&a.ranked_score.points)
        .then(b.ranked_score.games_played.cmp(&a.ranked_score.games_played))
}

impl Ranking {
    pub fn new(users: Arc<dyn UserStore>) -> Ranking {
        Ranking {
            users,
            snapshot: RwLock::new(Arc::new(CasteBreakpoints::default())),
        }
    }

    /// The most recently published breakpoints
    pub fn breakpoints(&self) -> Arc<CasteBreakpoints> {
        self.snapshot.read().clone()
    }

    /// Runs one full recomputation and publishes the new snapshot
    pub async fn recompute(&self) -> StoreResult<RankingSummary> {
        let all_users = self.users.iterate_all().await?;

        // Split the population: provisional players never compete for
        // the percentile castes
        let mut ranked: Vec<User> = Vec::new();
        let mut pinned: Vec<User> = Vec::new();
        for user in all_users {
            if user.ranked_score.games_played <= PROVISIONAL_GAMES_LIMIT {
                pinned.push(user);
            } else {
                ranked.push(user);
            }
        }
        ranked.sort_by(compare_rankings);

        let mut breakpoints = CasteBreakpoints::default();
        let mut assignments: Vec<(User, Caste, u32)> = Vec::new();

        // Draw the named tiers off the top of the stream
        let named_tiers: [(&mut Vec<UserId>, Caste, usize); 5] = [
            (&mut breakpoints.comet_player_ids, Caste::Comet, COMET_PLAYER_COUNT),
            (&mut breakpoints.sun_player_ids, Caste::Sun, SUN_PLAYER_COUNT),
            (
                &mut breakpoints.eclipsed_sun_player_ids,
                Caste::EclipsedSun,
                ECLIPSED_SUN_PLAYER_COUNT,
            ),
            (&mut breakpoints.moon_player_ids, Caste::Moon, MOON_PLAYER_COUNT),
            (
                &mut breakpoints.eclipsed_moon_player_ids,
                Caste::EclipsedMoon,
                ECLIPSED_MOON_PLAYER_COUNT,
            ),
        ];

        let mut stream = ranked.into_iter().enumerate();
        for (ids, caste, count) in named_tiers {
            for _ in 0..count {
                match stream.next() {
                    Some((position, user)) => {
                        ids.push(user.id);
                        assignments.push((user, caste, position as u32 + 1));
                    }
                    None => break,
                }
            }
        }

        // Remaining ranked users fill the normal castes from the top
        // (NiceCrown) downward by population share
        let remaining: Vec<(usize, User)> = stream.collect();
        let total = remaining.len();
        let mut cursor = 0usize;
        for caste_index in (0..RANK_PERCENTAGES.len()).rev() {
            let share = RANK_PERCENTAGES[caste_index];
            if share == 0.0 {
                continue;
            }
            let caste = Caste::from_index(caste_index as u8).expect("caste index in range");
            let is_last_caste = RANK_PERCENTAGES[..caste_index]
                .iter()
                .all(|earlier| *earlier == 0.0);
            let mut count = (total as f64 * share) as usize;
            if is_last_caste {
                // Rounding remainders all land in the lowest percentile
                // caste so nobody is left unassigned
                count = total - cursor;
            }

            for _ in 0..count {
                if cursor >= total {
                    break;
                }
                let (position, user) = remaining[cursor].clone();
                breakpoints.normal_caste_breakpoints[caste_index] = user.ranked_score.points;
                assignments.push((user, caste, position as u32 + 1));
                cursor += 1;
            }
        }

        let summary_pinned = pinned.len();
        for user in pinned {
            let caste = provisional_caste(user.ranked_score.games_played);
            assignments.push((user, caste, 0));
        }

        // Write back in bounded batches, yielding between them
        let mut castes_changed = 0usize;
        let mut operations = 0usize;
        let users_ranked = assignments.len() - summary_pinned;
        for (mut user, caste, numerical_rank) in assignments {
            if user.caste == caste && user.ranked_score.numerical_rank == numerical_rank {
                continue;
            }
            user.caste = caste;
            user.ranked_score.numerical_rank = numerical_rank;
            if let Err(err) = self.users.update(&user).await {
                warn!("failed to write caste for user {}: {}", user.id, err);
                continue;
            }
            castes_changed += 1;
            operations += 1;
            if operations % MAXIMUM_DATABASE_OPERATIONS_PER_CALL == 0 {
                tokio::task::yield_now().await;
            }
        }

        *self.snapshot.write() = Arc::new(breakpoints);

        let summary = RankingSummary {
            users_ranked,
            users_pinned: summary_pinned,
            castes_changed,
        };
        info!(
            "ranking pass complete ({} ranked, {} provisional, {} caste writes)",
            summary.users_ranked, summary.users_pinned, summary.castes_changed
        );
        Ok(summary)
    }
}

/// Background loop driving scheduled recomputations
pub async fn run_ranking(ranking: Arc<Ranking>) {
    let mut interval = tokio::time::interval(RANKING_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick; rankings at boot reflect the
    // stored state already
    interval.tick().await;
    loop {
        interval.tick().await;
        debug!("starting scheduled ranking pass");
        if let Err(err) = ranking.recompute().await {
            warn!("scheduled ranking pass failed: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::entities::user::UserFlags;
    use crate::database::entities::NewUser;
    use crate::database::memory::MemoryUserStore;
    use crate::utils::hashing::PasswordScheme;

    async fn seed_population(store: &MemoryUserStore, count: usize) -> Vec<UserId> {
        let mut ids = Vec::new();
        for index in 0..count {
            let mut user = store
                .insert(NewUser {
                    login: format!("user-{index}"),
                    display_name: format!("user-{index}"),
                    password_hash: String::new(),
                    salt: Vec::new(),
                    scheme: PasswordScheme::Bcrypt,
                    flags: UserFlags::empty(),
                })
                .await
                .unwrap();
            // Give everyone enough games to qualify, points descending
            // with creation order
            user.ranked_score.games_played = 10;
            user.ranked_score.points = (count - index) as i32 * 10;
            store.update(&user).await.unwrap();
            ids.push(user.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_named_tiers_drawn_in_order() {
        let store = Arc::new(MemoryUserStore::default());
        let ids = seed_population(&store, 20).await;
        let ranking = Ranking::new(store.clone());

        ranking.recompute().await.unwrap();
        let breakpoints = ranking.breakpoints();

        // Best player is the comet, then sun, eclipsed sun, two moons,
        // three eclipsed moons
        assert_eq!(breakpoints.comet_player_ids, vec![ids[0]]);
        assert_eq!(breakpoints.sun_player_ids, vec![ids[1]]);
        assert_eq!(breakpoints.eclipsed_sun_player_ids, vec![ids[2]]);
        assert_eq!(breakpoints.moon_player_ids, vec![ids[3], ids[4]]);
        assert_eq!(
            breakpoints.eclipsed_moon_player_ids,
            vec![ids[5], ids[6], ids[7]]
        );

        let comet = store.get_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(comet.caste, Caste::Comet);
        assert_eq!(comet.ranked_score.numerical_rank, 1);
    }

    #[tokio::test]
    async fn test_provisional_players_pinned_to_bottom() {
        let store = Arc::new(MemoryUserStore::default());
        seed_population(&store, 12).await;

        // A high-points player with too few games
        let newcomer = store
            .insert(NewUser {
                login: "newcomer".to_string(),
                display_name: "newcomer".to_string(),
                password_hash: String::new(),
                salt: Vec::new(),
                scheme: PasswordScheme::Bcrypt,
                flags: UserFlags::empty(),
            })
            .await
            .unwrap();
        let mut user = newcomer.clone();
        user.ranked_score.games_played = 2;
        user.ranked_score.points = 100_000;
        store.update(&user).await.unwrap();

        let ranking = Ranking::new(store.clone());
        ranking.recompute().await.unwrap();

        let pinned = store.get_by_id(newcomer.id).await.unwrap().unwrap();
        assert_eq!(pinned.caste, Caste::DaggerWithHilt);
        let breakpoints = ranking.breakpoints();
        assert!(!breakpoints.comet_player_ids.contains(&newcomer.id));
    }

    #[tokio::test]
    async fn test_every_qualified_user_gets_a_caste() {
        let store = Arc::new(MemoryUserStore::default());
        let ids = seed_population(&store, 50).await;
        let ranking = Ranking::new(store.clone());
        ranking.recompute().await.unwrap();

        for id in ids {
            let user = store.get_by_id(id).await.unwrap().unwrap();
            // Nobody remains in the provisional castes
            assert!(user.caste >= Caste::SwordAndDagger);
        }
    }

    #[tokio::test]
    async fn test_recompute_is_restart_safe() {
        let store = Arc::new(MemoryUserStore::default());
        seed_population(&store, 30).await;
        let ranking = Ranking::new(store.clone());

        let first = ranking.recompute().await.unwrap();
        assert!(first.castes_changed > 0);
        let snapshot = ranking.breakpoints();

        // A rerun from the same state converges: same snapshot, no
        // further writes
        let second = ranking.recompute().await.unwrap();
        assert_eq!(second.castes_changed, 0);
        assert_eq!(*ranking.breakpoints(), *snapshot);
    }
}
