//! Test helpers for integration tests.
//!
//! Provides a `Room` harness around an in-process hub, plus `TestServer` and
//! `TestClient` for driving the real WebSocket endpoint.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use parlor::chat::{ConnId, Outbound};
use parlor::config::{ChatConfig, ServerConfig};
use parlor::web::ServerEvent;
use parlor::{ChatHub, ChatStore, LoginRequest, ManualClock, MemoryStore, WebServer};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Password used for every seeded account.
pub const PASSWORD: &str = "password123";

/// Start of the manual clock.
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// A hub wired to a memory store and a manual clock.
pub struct Room {
    pub hub: Arc<ChatHub>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Room {
    /// Build a room with `root` as the only privileged admin.
    pub async fn new(accounts: &[&str]) -> Self {
        Self::with_config(
            ChatConfig {
                privileged_admins: vec!["root".to_string()],
                admin_override_password: Some("letmein".to_string()),
                ..ChatConfig::default()
            },
            accounts,
        )
        .await
    }

    /// Build a room with a custom configuration.
    pub async fn with_config(config: ChatConfig, accounts: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::new());
        for name in accounts {
            store.signup(name, PASSWORD).await.unwrap();
        }
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let hub = ChatHub::new(config, store.clone())
            .with_clock(clock.clone())
            .with_rng_seed(42);
        Self {
            hub: Arc::new(hub),
            store,
            clock,
        }
    }

    /// Open a connection from `ip` and log `name` in with a password.
    pub async fn join(&self, name: &str, ip: &str) -> Client {
        self.join_with(name, ip, None).await
    }

    /// Like [`Room::join`], presenting the admin override password.
    pub async fn join_with(&self, name: &str, ip: &str, admin_password: Option<&str>) -> Client {
        let (conn, rx) = self.hub.open_connection(ip);
        self.hub
            .login(
                conn,
                LoginRequest {
                    username: name.to_string(),
                    password: Some(PASSWORD.to_string()),
                    admin_password: admin_password.map(str::to_string),
                    ..LoginRequest::default()
                },
            )
            .await
            .unwrap();
        let mut client = Client { conn, rx };
        client.drain();
        client
    }

    /// Send a line as `client`.
    pub async fn say(&self, client: &Client, text: &str) -> parlor::Result<Option<String>> {
        self.hub.send_message(client.conn, text, None).await
    }
}

/// One hub connection and its outbound channel.
pub struct Client {
    pub conn: ConnId,
    pub rx: UnboundedReceiver<Outbound>,
}

impl Client {
    /// Take every queued event.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Event(event) = item {
                events.push(event);
            }
        }
        events
    }

    /// Take every queued event and return their names.
    pub fn names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(|e| e.name()).collect()
    }

    /// Whether a close request is queued (consumes the queue).
    pub fn was_closed(&mut self) -> bool {
        let mut closed = false;
        while let Ok(item) = self.rx.try_recv() {
            if item == Outbound::Close {
                closed = true;
            }
        }
        closed
    }
}

/// A real server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub room: Room,
}

impl TestServer {
    /// Start a server over a fresh room.
    pub async fn start(accounts: &[&str]) -> Self {
        let room = Room::new(accounts).await;
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            trust_forwarded_for: false,
        };
        let addr = WebServer::new(&config, room.hub.clone())
            .unwrap()
            .run_with_addr()
            .await
            .unwrap();
        Self { addr, room }
    }

    /// URL of the WebSocket endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// WebSocket client speaking the JSON event protocol.
pub struct TestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_ack: u64,
    /// Frames that arrived while waiting for an ack.
    backlog: VecDeque<Value>,
}

impl TestClient {
    /// Connect to the server.
    pub async fn connect(server: &TestServer) -> Self {
        let (stream, _) = connect_async(server.ws_url()).await.unwrap();
        Self {
            stream,
            next_ack: 0,
            backlog: VecDeque::new(),
        }
    }

    /// Send an event without asking for an ack.
    pub async fn emit(&mut self, mut event: Value) {
        if let Some(obj) = event.as_object_mut() {
            obj.remove("ack");
        }
        self.stream
            .send(Message::Text(event.to_string()))
            .await
            .unwrap();
    }

    /// Send an event and wait for its ack. Other frames are kept for later.
    pub async fn request(&mut self, mut event: Value) -> Value {
        self.next_ack += 1;
        let ack = self.next_ack;
        event["ack"] = json!(ack);
        self.stream
            .send(Message::Text(event.to_string()))
            .await
            .unwrap();
        loop {
            let frame = self
                .recv_socket()
                .await
                .expect("connection closed before ack");
            if frame["event"] == "ack" && frame["ack"] == ack {
                return frame;
            }
            self.backlog.push_back(frame);
        }
    }

    /// Log in with the seeded password.
    pub async fn login(&mut self, name: &str) -> Value {
        self.request(json!({"event": "login", "username": name, "password": PASSWORD}))
            .await
    }

    /// Receive the next JSON frame, or `None` when the socket closes.
    pub async fn recv(&mut self) -> Option<Value> {
        if let Some(frame) = self.backlog.pop_front() {
            return Some(frame);
        }
        self.recv_socket().await
    }

    async fn recv_socket(&mut self) -> Option<Value> {
        loop {
            let msg = timeout(DEFAULT_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for a frame")?;
            match msg {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Receive frames until one with the given event name arrives.
    pub async fn expect(&mut self, event: &str) -> Value {
        loop {
            let frame = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("connection closed while waiting for {event}"));
            if frame["event"] == event {
                return frame;
            }
        }
    }
}
