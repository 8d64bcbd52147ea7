//! Post-game standings reconciliation and score application.
//!
//! Every client in a finished game reports its own view of the final
//! standings. Two independent reports that agree become the
//! authoritative result; with no agreement the game is aborted for
//! ranking purposes and no scores move.

use crate::database::entities::user::NUMBER_OF_TRACKED_GAME_TYPES;
use crate::database::{AuditEvent, StoreResult, UserStore};
use crate::utils::types::{TeamIndex, UserId};
use log::{error, warn};

/// Points awarded to every player on the winning team
const WIN_POINTS: i32 = 3;
/// Points taken from every player on the last-placed team
const LOSS_POINTS: i32 = 1;

/// End-of-game codes carried in a report
pub const GAME_ENDED_NORMALLY: u16 = 0;
pub const GAME_ENDED_WITH_DISCONNECT: u16 = 1;

/// One player's line inside a standings report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStanding {
    pub user_id: UserId,
    pub team: TeamIndex,
    pub points_killed: i32,
    pub points_lost: i32,
}

/// One team's final placement; place 0 is the winner, the highest
/// place is the loser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamStanding {
    pub place: u16,
}

/// A client-submitted claim of the final game outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingsReport {
    pub game_ended_code: u16,
    pub version: u16,
    pub number_of_players: u16,
    /// Scoring row the per-game-type scores land in
    pub game_scoring: u16,
    pub players: Vec<PlayerStanding>,
    pub teams: Vec<TeamStanding>,
}

/// The agreement predicate between two reports
pub fn same_standings(a: &StandingsReport, b: &StandingsReport) -> bool {
    a.game_ended_code == b.game_ended_code
        && a.version == b.version
        && a.number_of_players == b.number_of_players
}

/// Picks the authoritative report out of those received, in receipt
/// order. The first report becomes the candidate; the first later
/// report agreeing with it settles the result. A single-player game
/// accepts its lone report. No agreeing pair means no result.
pub fn find_good_standings(
    player_count: usize,
    reports: &[StandingsReport],
) -> Option<&StandingsReport> {
    if reports.is_empty() {
        return None;
    }
    if player_count == 1 {
        return reports.first();
    }

    let mut good: Option<&StandingsReport> = None;
    for report in reports {
        match good {
            Some(candidate) => {
                if same_standings(report, candidate) {
                    return good;
                }
            }
            None => good = Some(report),
        }
    }
    None
}

/// Applies the authoritative standings to every player's persistent
/// score rows.
///
/// Each player's increments are committed as a single store update. A
/// failing update is logged and skipped; players committed before it
/// stay committed. Idempotency across the whole game comes from the
/// caller marking the game id scored before invoking this.
pub async fn apply_scores(
    users: &dyn UserStore,
    audit: &dyn crate::database::AuditLog,
    standings: &StandingsReport,
) -> StoreResult<()> {
    let number_of_teams = standings.teams.len();
    // Ties for the bottom are all losses, so "last" is the worst place
    // actually present rather than team-count minus one
    let last_place = standings
        .teams
        .iter()
        .map(|team| team.place as usize)
        .max()
        .unwrap_or(0);

    for line in &standings.players {
        let mut user = match users.get_by_id(line.user_id).await? {
            Some(user) => user,
            None => {
                warn!("standings reference unknown user {}", line.user_id);
                continue;
            }
        };

        let place = match standings.teams.get(line.team as usize) {
            Some(team) => team.place as usize,
            None => {
                warn!(
                    "standings for user {} reference team {} out of {}",
                    line.user_id, line.team, number_of_teams
                );
                continue;
            }
        };

        let game_type = standings.game_scoring as usize;
        if game_type >= NUMBER_OF_TRACKED_GAME_TYPES {
            warn!("standings carry untracked game type {}", game_type);
            continue;
        }

        let damage_inflicted = line.points_killed.max(0) as u32;
        let damage_received = line.points_lost.max(0) as u32;

        // Overall ranked row plus the per-game-type row move together
        let rows = [
            &mut user.ranked_score,
            &mut user.ranked_score_by_game_type[game_type],
        ];
        for row in rows {
            row.games_played += 1;
            row.damage_inflicted += damage_inflicted;
            row.damage_received += damage_received;

            if place == 0 {
                row.wins += 1;
                row.points += WIN_POINTS;
                if row.points > row.highest_points {
                    row.highest_points = row.points;
                }
            } else if place == last_place {
                row.losses += 1;
                row.points -= LOSS_POINTS;
            }
        }

        if let Err(err) = users.update(&user).await {
            // This player's increment is lost with the failed write;
            // earlier players stay committed
            error!("failed to commit score update for {}: {}", user.id, err);
        }
    }

    if let Err(err) = audit
        .append(AuditEvent::now(
            "game-scored",
            format!(
                "players={} teams={} ended={}",
                standings.players.len(),
                number_of_teams,
                standings.game_ended_code
            ),
        ))
        .await
    {
        warn!("failed to audit game scoring: {}", err);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::entities::user::UserFlags;
    use crate::database::entities::NewUser;
    use crate::database::memory::{MemoryAuditLog, MemoryUserStore};
    use crate::utils::hashing::PasswordScheme;

    fn report(ended: u16, version: u16, players: Vec<PlayerStanding>) -> StandingsReport {
        StandingsReport {
            game_ended_code: ended,
            version,
            number_of_players: players.len() as u16,
            game_scoring: 0,
            players,
            teams: Vec::new(),
        }
    }

    fn line(user_id: UserId, team: TeamIndex) -> PlayerStanding {
        PlayerStanding {
            user_id,
            team,
            points_killed: 5,
            points_lost: 2,
        }
    }

    #[test]
    fn test_agreeing_pair_is_authoritative() {
        let a = report(
            GAME_ENDED_NORMALLY,
            1,
            vec![line(1, 0), line(2, 1), line(3, 1)],
        );
        let b = a.clone();
        let c = report(
            GAME_ENDED_WITH_DISCONNECT,
            1,
            vec![line(1, 0), line(2, 2), line(3, 1)],
        );

        let reports = vec![a.clone(), b, c];
        let good = find_good_standings(3, &reports).expect("agreement expected");
        assert!(same_standings(good, &a));
    }

    #[test]
    fn test_no_agreement_yields_none() {
        let a = report(0, 1, vec![line(1, 0)]);
        let b = report(1, 1, vec![line(1, 0)]);
        let c = report(2, 1, vec![line(1, 0)]);
        assert!(find_good_standings(3, &[a, b, c]).is_none());
    }

    #[test]
    fn test_single_player_report_accepted() {
        let a = report(0, 1, vec![line(1, 0)]);
        let reports = [a.clone()];
        let good = find_good_standings(1, &reports).unwrap();
        assert_eq!(*good, a);
    }

    async fn seeded_store(ids: &[&str]) -> (MemoryUserStore, Vec<UserId>) {
        let store = MemoryUserStore::default();
        let mut out = Vec::new();
        for login in ids {
            let user = store
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
            out.push(user.id);
        }
        (store, out)
    }

    #[tokio::test]
    async fn test_score_application() {
        let (store, ids) = seeded_store(&["a", "b", "c"]).await;
        let audit = MemoryAuditLog::default();

        let standings = StandingsReport {
            game_ended_code: GAME_ENDED_NORMALLY,
            version: 1,
            number_of_players: 3,
            game_scoring: 2,
            players: vec![
                PlayerStanding {
                    user_id: ids[0],
                    team: 0,
                    points_killed: 9,
                    points_lost: 1,
                },
                PlayerStanding {
                    user_id: ids[1],
                    team: 1,
                    points_killed: 2,
                    points_lost: 4,
                },
                PlayerStanding {
                    user_id: ids[2],
                    team: 2,
                    points_killed: 3,
                    points_lost: 3,
                },
            ],
            teams: vec![
                TeamStanding { place: 0 },
                TeamStanding { place: 2 },
                TeamStanding { place: 1 },
            ],
        };

        apply_scores(&store, &audit, &standings).await.unwrap();

        let winner = store.get_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(winner.ranked_score.wins, 1);
        assert_eq!(winner.ranked_score.points, 3);
        assert_eq!(winner.ranked_score.highest_points, 3);
        assert_eq!(winner.ranked_score.games_played, 1);
        assert_eq!(winner.ranked_score.damage_inflicted, 9);
        assert_eq!(winner.ranked_score_by_game_type[2].wins, 1);

        let loser = store.get_by_id(ids[1]).await.unwrap().unwrap();
        assert_eq!(loser.ranked_score.losses, 1);
        assert_eq!(loser.ranked_score.points, -1);
        assert_eq!(loser.ranked_score.display_points(), 0);

        // Middle place only accumulates games played and damage
        let middle = store.get_by_id(ids[2]).await.unwrap().unwrap();
        assert_eq!(middle.ranked_score.wins, 0);
        assert_eq!(middle.ranked_score.losses, 0);
        assert_eq!(middle.ranked_score.points, 0);
        assert_eq!(middle.ranked_score.games_played, 1);
    }
}
