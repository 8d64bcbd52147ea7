#![warn(unused_crate_dependencies)]

use crate::config::{load_config, Config, StorageMode, VERSION};
use crate::database::file::{FileAuditLog, FileBanList, FileOrderStore, FileUserStore};
use crate::database::Stores;
use crate::packet::opcodes::Opcode;
use crate::packet::{Packet, PacketCodec};
use crate::services::game::manager::run_reaper;
use crate::services::orders::run_order_sweep;
use crate::services::ranking::run_ranking;
use crate::services::rooms::RoomTemplate;
use crate::session::{run_connection_reaper, run_listener, ConnectionClass};
use crate::utils::logging;
use clap::{Parser, Subcommand};
use futures_util::SinkExt;
use log::{error, info};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_util::codec::Framed;

mod config;
mod database;
mod packet;
mod server;
mod services;
mod session;
mod utils;

#[derive(Parser)]
#[command(name = "myth-metaserver", version, about = "Multiplayer game metaserver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring up all listeners and serve until stopped
    Start {
        /// Player listener port
        #[arg(long)]
        userd_port: Option<u16>,
        /// Web/admin listener port
        #[arg(long)]
        web_port: Option<u16>,
        /// Room-server listener port
        #[arg(long)]
        room_port: Option<u16>,
        /// Disable outbound mail notifications
        #[arg(long)]
        no_mail: bool,
    },
    /// Ask a running server to shut down gracefully
    Stop {
        /// Web/admin port of the running server
        #[arg(long)]
        web_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Start {
            userd_port,
            web_port,
            room_port,
            no_mail,
        } => {
            let mut config = load_config().unwrap_or_default();
            if let Some(port) = userd_port {
                config.userd_port = port;
            }
            if let Some(port) = web_port {
                config.web_port = port;
            }
            if let Some(port) = room_port {
                config.room_port = port;
            }
            if no_mail {
                config.no_mail = true;
            }
            start(config).await
        }
        Command::Stop { web_port } => {
            let config = load_config().unwrap_or_default();
            let port = web_port.unwrap_or(config.web_port);
            stop(port).await
        }
    }
}

async fn start(config: Config) -> ExitCode {
    // The data directory backs both logging and the file stores
    if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
        eprintln!("Failed to create data directory: {}", err);
        return ExitCode::FAILURE;
    }
    logging::setup(config.logging);

    // The room list is the whole room roster; without it the server
    // cannot do its job
    let room_list = match std::fs::read_to_string(&config.room_list_file) {
        Ok(contents) => contents,
        Err(err) => {
            error!(
                "no rooms list file at {} ({}); the server will not be able to load any rooms",
                config.room_list_file.display(),
                err
            );
            return ExitCode::FAILURE;
        }
    };
    let templates = RoomTemplate::parse_list(&room_list);
    info!("loaded {} room templates", templates.len());

    let stores = match build_stores(&config).await {
        Ok(stores) => stores,
        Err(err) => {
            error!("failed to open stores: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let (server, game_events) = server::Server::new(config, stores, templates);
    let config = &server.config;

    // Bind all three listeners while the ports are still free; any
    // failure here is fatal
    let player_addr = SocketAddr::new(config.host, config.userd_port);
    let web_addr = SocketAddr::new(config.host, config.web_port);
    let room_addr = SocketAddr::new(config.host, config.room_port);
    let (player_listener, web_listener, room_listener) = match (
        TcpListener::bind(player_addr).await,
        TcpListener::bind(web_addr).await,
        TcpListener::bind(room_addr).await,
    ) {
        (Ok(player), Ok(web), Ok(room)) => (player, web, room),
        (player, web, room) => {
            for (addr, result) in [
                (player_addr, player.err()),
                (web_addr, web.err()),
                (room_addr, room.err()),
            ] {
                if let Some(err) = result {
                    error!("failed to bind listener on {}: {}", addr, err);
                }
            }
            return ExitCode::FAILURE;
        }
    };

    info!(
        "metaserver listening (player: {}, web: {}, room: {}) (v{})",
        player_addr, web_addr, room_addr, VERSION
    );

    let tasks = vec![
        tokio::spawn(run_listener(
            server.clone(),
            player_listener,
            ConnectionClass::Player,
        )),
        tokio::spawn(run_listener(
            server.clone(),
            web_listener,
            ConnectionClass::Web,
        )),
        tokio::spawn(run_listener(
            server.clone(),
            room_listener,
            ConnectionClass::RoomServer,
        )),
        tokio::spawn(run_connection_reaper(server.clone())),
        tokio::spawn(run_reaper(server.games.clone())),
        tokio::spawn(run_ranking(server.ranking.clone())),
        tokio::spawn(run_order_sweep(server.orders.clone())),
        tokio::spawn(server::run_game_events(server.clone(), game_events)),
        tokio::spawn(server::run_stats_export(server.clone())),
    ];

    // Serve until ctrl-c or an admin shutdown request
    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = server.shutdown.notified() => info!("shutdown requested, shutting down"),
    }

    // Graceful teardown: stop accepting, close every connection, give
    // writers a moment to flush, then force termination
    for task in &tasks {
        task.abort();
    }
    server.connections.close_all();
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("shutdown complete");
    ExitCode::SUCCESS
}

async fn build_stores(config: &Config) -> Result<Stores, crate::database::StoreError> {
    match config.storage {
        StorageMode::Memory => Ok(Stores::in_memory()),
        StorageMode::File => {
            let users = FileUserStore::open(&config.data_dir.join("users.db")).await?;
            let orders = FileOrderStore::open(&config.data_dir.join("orders.db")).await?;
            let bans = FileBanList::open(&config.data_dir.join("banlist.txt")).await?;
            let audit = FileAuditLog::open(&config.data_dir.join("audit.log")).await?;
            Ok(Stores {
                users: Arc::new(users),
                orders: Arc::new(orders),
                bans: Arc::new(bans),
                audit: Arc::new(audit),
            })
        }
    }
}

/// Connects to the local admin port and requests graceful shutdown
async fn stop(web_port: u16) -> ExitCode {
    let addr = SocketAddr::from(([127, 0, 0, 1], web_port));
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("No server reachable on {}: {}", addr, err);
            return ExitCode::FAILURE;
        }
    };

    let mut framed = Framed::new(stream, PacketCodec);
    if let Err(err) = framed.send(Packet::empty(Opcode::Shutdown)).await {
        eprintln!("Failed to send shutdown request: {}", err);
        return ExitCode::FAILURE;
    }
    println!("Shutdown requested");
    ExitCode::SUCCESS
}
