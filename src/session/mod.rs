//! Live connections: the per-socket reader and writer tasks, the
//! connection registry used for fan-out, and the idle reaper.
//!
//! Each accepted socket becomes a [`Connection`]: a reader loop that
//! decodes frames and dispatches them, and a writer task draining a
//! bounded egress queue. All transport errors are terminal for the
//! connection and never for the server.

use crate::packet::opcodes::{MessageCode, Opcode};
use crate::packet::{Packet, PacketCodec};
use crate::server::Server;
use crate::services::sessions::AuthToken;
use crate::session::models::auth::ServerMessage;
use crate::utils::net;
use crate::utils::types::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::Framed;
use uuid::Uuid;

pub mod models;
pub mod routes;

/// Egress queue depth in frames. With the frame cap this bounds the
/// bytes a slow client can hold on the server.
pub const EGRESS_QUEUE_FRAMES: usize = 64;

/// Interval between idle-connection reaper passes
pub const CONNECTION_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Login failures allowed on one connection before it is closed
pub const MAXIMUM_LOGIN_ATTEMPTS: u8 = 3;

/// The three classes of TCP client, fixed by which listener accepted
/// the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClass {
    Player,
    RoomServer,
    Web,
}

impl ConnectionClass {
    /// Idle threshold before the reaper closes the connection
    pub fn idle_timeout(&self) -> Duration {
        match self {
            ConnectionClass::Player => Duration::from_secs(10 * 60),
            ConnectionClass::RoomServer => Duration::from_secs(5 * 60),
            ConnectionClass::Web => Duration::from_secs(2 * 60),
        }
    }
}

/// Items moving through the egress queue
enum Egress {
    Packet(Packet),
    /// Flush and shut the socket down
    Close,
}

/// Shared handle to one live connection
pub struct Connection {
    pub id: ConnectionId,
    pub class: ConnectionClass,
    pub addr: SocketAddr,
    /// Peer address in 32-bit host order, zero for non-IPv4 peers
    pub host_addr: u32,
    tx: mpsc::Sender<Egress>,
    last_message_at: Mutex<Instant>,
    failed_logins: AtomicU8,
    closed: AtomicBool,
    close_signal: Notify,
    /// Game-type flags the client reported at login, consulted at
    /// room admission
    pub client_flags: AtomicU32,
    /// Token minted for this connection's login, revoked at logout
    pub token: Mutex<Option<AuthToken>>,
}

impl Connection {
    /// Queues a packet for the writer task. A full queue means the
    /// peer has stopped draining; the connection is closed rather than
    /// letting it stall everyone fanning out to it.
    pub fn send(&self, packet: Packet) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(Egress::Packet(packet)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "egress queue overflow, dropping connection (CID: {})",
                    self.id
                );
                self.close();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Sends a SERVER_MESSAGE with the code's standard text
    pub fn send_message(&self, code: MessageCode) {
        self.send_message_text(code, code.message().to_string());
    }

    /// Sends a SERVER_MESSAGE with custom display text
    pub fn send_message_text(&self, code: MessageCode, text: String) {
        self.send(Packet::of(
            Opcode::ServerMessage,
            &ServerMessage {
                code: code as u16,
                text,
            },
        ));
    }

    /// Initiates connection shutdown: the writer flushes what it has
    /// and closes the socket, the reader observes the signal and stops
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.try_send(Egress::Close);
        self.close_signal.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records inbound protocol activity
    pub fn touch(&self) {
        *self.last_message_at.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_message_at.lock().elapsed()
    }

    /// Bumps the failed-login counter, reporting whether the attempt
    /// cap has been reached
    pub fn record_failed_login(&self) -> bool {
        let attempts = self.failed_logins.fetch_add(1, Ordering::AcqRel) + 1;
        attempts >= MAXIMUM_LOGIN_ATTEMPTS
    }
}

/// Registry of live connections, used for directed sends and fan-out
#[derive(Default)]
pub struct Connections {
    map: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Connections {
    fn insert(&self, connection: Arc<Connection>) {
        self.map.lock().insert(connection.id, connection);
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.map.lock().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.map.lock().get(&id).cloned()
    }

    /// Sends one packet to a connection if it is still live
    pub fn send_to(&self, id: ConnectionId, packet: Packet) {
        if let Some(connection) = self.get(id) {
            connection.send(packet);
        }
    }

    /// Clones the packet into every listed connection's queue
    pub fn fan_out(&self, targets: &[ConnectionId], packet: &Packet) {
        let map = self.map.lock();
        for id in targets {
            if let Some(connection) = map.get(id) {
                connection.send(packet.clone());
            }
        }
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.map.lock().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.map.lock().len()
    }

    /// Closes every connection, used at shutdown
    pub fn close_all(&self) {
        for connection in self.all() {
            connection.close();
        }
    }
}

/// Drives one accepted socket to completion. Owns the reader side;
/// the writer runs as its own task and is joined through the egress
/// channel closing.
pub async fn handle_connection(
    server: Arc<Server>,
    stream: TcpStream,
    addr: SocketAddr,
    class: ConnectionClass,
) {
    // Host admission: loopback and the server's own /24 skip the ban
    // list, everyone else is looked up
    let host_addr = net::ipv4_to_host_order(addr.ip()).unwrap_or(0);
    if !net::is_trusted_peer(addr.ip(), server.primary_addr) {
        match server.stores.bans.is_banned(host_addr).await {
            Ok(false) => {}
            Ok(true) => {
                info!("refusing banned peer {}", addr);
                return;
            }
            Err(err) => {
                error!("ban list lookup failed for {}: {}", addr, err);
                return;
            }
        }
    }

    let (tx, rx) = mpsc::channel(EGRESS_QUEUE_FRAMES);
    let connection = Arc::new(Connection {
        id: Uuid::new_v4(),
        class,
        addr,
        host_addr,
        tx,
        last_message_at: Mutex::new(Instant::now()),
        failed_logins: AtomicU8::new(0),
        closed: AtomicBool::new(false),
        close_signal: Notify::new(),
        client_flags: AtomicU32::new(0),
        token: Mutex::new(None),
    });

    debug!(
        "connection accepted (CID: {}, class: {:?}, peer: {})",
        connection.id, class, addr
    );
    server.connections.insert(connection.clone());

    let framed = Framed::new(stream, PacketCodec);
    let (sink, mut frames) = framed.split();

    let writer = tokio::spawn(run_writer(sink, rx));

    // Reader loop: decode, dispatch, stop on transport error or close
    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = connection.close_signal.notified() => break,
        };

        let packet = match frame {
            Some(Ok(packet)) => packet,
            Some(Err(err)) => {
                debug!("transport error on {} ({}): {}", connection.id, addr, err);
                break;
            }
            // Peer closed the socket
            None => break,
        };

        connection.touch();
        if let Err(action) = routes::handle(&server, &connection, packet).await {
            match action {
                routes::RouteError::Message(code) => connection.send_message(code),
                routes::RouteError::MessageText(code, text) => {
                    connection.send_message_text(code, text)
                }
                routes::RouteError::Terminal(code) => {
                    connection.send_message(code);
                    break;
                }
                routes::RouteError::Internal => {
                    connection.send_message(MessageCode::InternalError)
                }
            }
        }

        if connection.is_closed() {
            break;
        }
    }

    // Disconnect: release every resource this connection held. The
    // writer task drains whatever is queued and exits on its own once
    // the last handle to this connection drops.
    connection.close();
    server.connections.remove(connection.id);
    routes::handle_disconnect(&server, &connection).await;
    drop(writer);
    debug!("connection finished (CID: {})", connection.id);
}

/// Writer task: drains the egress queue into the socket in order.
/// Exits when asked to close or when every sender is gone.
async fn run_writer(
    mut sink: futures_util::stream::SplitSink<Framed<TcpStream, PacketCodec>, Packet>,
    mut rx: mpsc::Receiver<Egress>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Egress::Packet(packet) => {
                if let Err(err) = sink.send(packet).await {
                    debug!("write failed, dropping connection: {}", err);
                    break;
                }
            }
            Egress::Close => break,
        }
    }
    let _ = sink.close().await;
}

/// Accept loop for one listener; every accepted socket gets its own
/// connection task
pub async fn run_listener(
    server: Arc<Server>,
    listener: tokio::net::TcpListener,
    class: ConnectionClass,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(server.clone(), stream, addr, class));
            }
            Err(err) => {
                // Transient accept errors (EMFILE and friends) are
                // logged and retried after a pause
                error!("accept failed on {:?} listener: {}", class, err);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Background loop closing connections idle beyond their class
/// threshold
pub async fn run_connection_reaper(server: Arc<Server>) {
    let mut interval = tokio::time::interval(CONNECTION_REAP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        for connection in server.connections.all() {
            if connection.idle_for() > connection.class.idle_timeout() {
                info!(
                    "reaping idle connection (CID: {}, class: {:?})",
                    connection.id, connection.class
                );
                connection.close();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Config, StorageMode};
    use crate::database::entities::user::UserFlags;
    use crate::database::entities::NewUser;
    use crate::database::Stores;
    use crate::packet::opcodes::{MessageCode, Opcode};
    use crate::packet::{Packet, PacketCodec};
    use crate::services::rooms::RoomTemplate;
    use crate::services::sessions::unix_now;
    use crate::session::models::auth::{LoginRequest, LoginSuccess, ServerMessage};
    use crate::utils::hashing::{generate_salt, hash_password, PasswordScheme};
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_util::codec::Framed;

    const LOCALHOST: u32 = 0x7F000001;

    async fn seed_user(stores: &Stores, login: &str, password: &str) -> u32 {
        let salt = generate_salt();
        let hash = hash_password(password, &salt, PasswordScheme::Bcrypt).unwrap();
        stores
            .users
            .insert(NewUser {
                login: login.to_string(),
                display_name: login.to_string(),
                password_hash: hash,
                salt,
                scheme: PasswordScheme::Bcrypt,
                flags: UserFlags::empty(),
            })
            .await
            .unwrap()
            .id
    }

    /// Brings up a full server on ephemeral ports with in-memory
    /// stores, returning the player listener address
    async fn test_server() -> (Arc<Server>, SocketAddr) {
        let config = Config {
            storage: StorageMode::Memory,
            ..Default::default()
        };
        let stores = Stores::in_memory();
        let templates = RoomTemplate::parse_list("MYTH2 1 1 0 0 16 0\n");
        let (server, events) = crate::server::Server::new(config, stores, templates);
        tokio::spawn(crate::server::run_game_events(server.clone(), events));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_listener(server.clone(), listener, ConnectionClass::Player));
        (server, addr)
    }

    struct TestClient {
        framed: Framed<TcpStream, PacketCodec>,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> TestClient {
            let stream = TcpStream::connect(addr).await.unwrap();
            TestClient {
                framed: Framed::new(stream, PacketCodec),
            }
        }

        async fn send(&mut self, packet: Packet) {
            self.framed.send(packet).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Packet> {
            timeout(Duration::from_secs(5), self.framed.next())
                .await
                .expect("timed out waiting for a packet")
                .map(|result| result.expect("transport error"))
        }

        /// Receives until a packet with the wanted opcode arrives
        async fn recv_opcode(&mut self, opcode: Opcode) -> Packet {
            loop {
                let packet = self.recv().await.expect("connection closed early");
                if packet.opcode == opcode as u16 {
                    return packet;
                }
            }
        }

        async fn login(&mut self, login: &str, password: &str) {
            self.send(Packet::of(
                Opcode::Login,
                &LoginRequest {
                    client_flags: 0x2,
                    build_version: 417,
                    login: login.to_string(),
                    password: password.to_string(),
                },
            ))
            .await;
        }
    }

    #[tokio::test]
    async fn test_login_success_and_token_binding() {
        let (server, addr) = test_server().await;
        let alice = seed_user(&server.stores, "alice", "hunter2").await;

        let mut client = TestClient::connect(addr).await;
        client.login("alice", "hunter2").await;

        let packet = client.recv_opcode(Opcode::UserSuccessfulLogin).await;
        let success: LoginSuccess = packet.deserialize().unwrap();
        assert_eq!(success.user_id, alice);

        // The token is bound to the presenting address
        let now = unix_now();
        assert_eq!(
            server.sessions.validate_token(&success.token, LOCALHOST, now),
            Ok(alice)
        );
        assert!(server
            .sessions
            .validate_token(&success.token, 0x0A000001, now)
            .is_err());

        // The room roster follows the login
        client.recv_opcode(Opcode::RoomList).await;
    }

    #[tokio::test]
    async fn test_wrong_password_is_indistinguishable() {
        let (server, addr) = test_server().await;
        seed_user(&server.stores, "alice", "hunter2").await;

        let mut client = TestClient::connect(addr).await;
        client.login("alice", "wrong").await;
        let packet = client.recv_opcode(Opcode::ServerMessage).await;
        let message: ServerMessage = packet.deserialize().unwrap();
        assert_eq!(
            message.code,
            MessageCode::LoginFailedBadUserOrPassword as u16
        );

        // Unknown account: byte-identical failure
        client.login("nobody", "hunter2").await;
        let packet = client.recv_opcode(Opcode::ServerMessage).await;
        let unknown: ServerMessage = packet.deserialize().unwrap();
        assert_eq!(unknown, message);
    }

    #[tokio::test]
    async fn test_duplicate_login_kicks_old_session() {
        let (server, addr) = test_server().await;
        let bob = seed_user(&server.stores, "bob", "sekrit").await;

        let mut first = TestClient::connect(addr).await;
        first.login("bob", "sekrit").await;
        first.recv_opcode(Opcode::UserSuccessfulLogin).await;

        let mut second = TestClient::connect(addr).await;
        second.login("bob", "sekrit").await;

        // The new session is authenticated
        let packet = second.recv_opcode(Opcode::UserSuccessfulLogin).await;
        let success: LoginSuccess = packet.deserialize().unwrap();
        assert_eq!(success.user_id, bob);

        // The old one is told and then dropped
        let packet = first.recv_opcode(Opcode::ServerMessage).await;
        let message: ServerMessage = packet.deserialize().unwrap();
        assert_eq!(message.code, MessageCode::AccountAlreadyLoggedIn as u16);
        assert!(first.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_keepalive_echo() {
        let (_server, addr) = test_server().await;
        let mut client = TestClient::connect(addr).await;
        client.send(Packet::empty(Opcode::Keepalive)).await;
        let packet = client.recv_opcode(Opcode::Keepalive).await;
        assert!(packet.contents.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_opcode_terminates() {
        let (_server, addr) = test_server().await;
        let mut client = TestClient::connect(addr).await;
        client.send(Packet {
            opcode: 181,
            contents: bytes::Bytes::new(),
        })
        .await;
        let packet = client.recv_opcode(Opcode::ServerMessage).await;
        let message: ServerMessage = packet.deserialize().unwrap();
        assert_eq!(message.code, MessageCode::SyntaxError as u16);
        assert!(client.recv().await.is_none());
    }
}
