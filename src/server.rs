//! The server aggregate: one struct owning every component handle,
//! passed explicitly to handlers and background tasks. There are no
//! process-wide mutable globals; configuration is frozen at startup.

use crate::config::Config;
use crate::database::{AuditEvent, Stores};
use crate::packet::opcodes::Opcode;
use crate::packet::Packet;
use crate::services::game::manager::Games;
use crate::services::game::search::{GameEvent, GameSearch};
use crate::services::orders::Orders;
use crate::services::ranking::Ranking;
use crate::services::rooms::{Rooms, RoomTemplate};
use crate::services::sessions::Sessions;
use crate::session::models::game::{GameList, GameListEntry};
use crate::session::Connections;
use crate::utils::net;
use crate::utils::types::RoomId;
use log::{info, warn};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Interval between stats exports
pub const STATS_EXPORT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

pub struct Server {
    pub config: Config,
    pub stores: Stores,
    pub sessions: Sessions,
    pub rooms: Rooms,
    pub games: Arc<Games>,
    pub search: Arc<GameSearch>,
    pub ranking: Arc<Ranking>,
    pub orders: Arc<Orders>,
    pub connections: Connections,
    /// Anchor for the same-/24 admission heuristic
    pub primary_addr: Ipv4Addr,
    /// Signalled by the admin surface to begin graceful shutdown
    pub shutdown: Notify,
}

impl Server {
    /// Builds the aggregate. The returned receiver carries game
    /// lifecycle events and must be driven by [`run_game_events`].
    pub fn new(
        config: Config,
        stores: Stores,
        templates: Vec<RoomTemplate>,
    ) -> (Arc<Server>, mpsc::UnboundedReceiver<GameEvent>) {
        let (games, events) = Games::new(stores.users.clone(), stores.audit.clone());
        let rooms = Rooms::new(templates, config.max_room_occupancy);
        let ranking = Arc::new(Ranking::new(stores.users.clone()));
        let orders = Arc::new(Orders::new(
            stores.orders.clone(),
            stores.users.clone(),
            stores.audit.clone(),
        ));

        let server = Arc::new(Server {
            config,
            stores,
            sessions: Sessions::new(),
            rooms,
            games: Arc::new(games),
            search: Arc::new(GameSearch::new()),
            ranking,
            orders,
            connections: Connections::default(),
            primary_addr: net::primary_interface_addr(),
            shutdown: Notify::new(),
        });

        (server, events)
    }

    /// Pushes the current game list of a room to all of its members
    fn publish_room_games(&self, room: RoomId) {
        let games = self
            .games
            .snapshot_room(room)
            .iter()
            .map(GameListEntry::of)
            .collect();
        let packet = Packet::of(Opcode::GameList, &GameList { games });
        // Sender id zero matches nobody, so every member receives it
        let targets = self.rooms.broadcast_targets(room, 0);
        self.connections.fan_out(&targets, &packet);
    }
}

/// Fans coordinator lifecycle events out to everything that mirrors
/// game state: the search index, the per-room hosted-game sets, and
/// the members of the affected room. Events apply in receipt order.
pub async fn run_game_events(
    server: Arc<Server>,
    mut events: mpsc::UnboundedReceiver<GameEvent>,
) {
    while let Some(event) = events.recv().await {
        let room = match &event {
            GameEvent::Added(advert) => {
                server.rooms.add_game(advert.room, advert.id);
                advert.room
            }
            GameEvent::Changed(advert) => advert.room,
            GameEvent::Removed { room, game } => {
                server.rooms.remove_game(*room, *game);
                *room
            }
        };
        server.search.apply(event);
        server.publish_room_games(room);
    }
}

/// Periodic aggregate counters for the operators: logged and appended
/// to the audit trail
pub async fn run_stats_export(server: Arc<Server>) {
    let mut interval = tokio::time::interval(STATS_EXPORT_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;

        let users = match server.stores.users.iterate_all().await {
            Ok(users) => users.len(),
            Err(err) => {
                warn!("stats export could not read the user store: {}", err);
                continue;
            }
        };
        let detail = format!(
            "users={} sessions={} connections={} games={} adverts={} rooms={}",
            users,
            server.sessions.session_count(),
            server.connections.count(),
            server.games.total(),
            server.search.advert_count(),
            server.rooms.room_count(),
        );
        info!("stats export: {}", detail);
        if let Err(err) = server
            .stores
            .audit
            .append(AuditEvent::now("stats-export", detail))
            .await
        {
            warn!("stats export audit append failed: {}", err);
        }
    }
}
