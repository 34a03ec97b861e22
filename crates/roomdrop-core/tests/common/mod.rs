//! Common test utilities for `Roomdrop` integration tests.
//!
//! Provides an in-process room hub (WebSocket relay) and a mock room
//! backend (HTTP), both bound to `127.0.0.1:0`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use roomdrop_core::config::Config;

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temp dir")
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Poll `check` until it returns true, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn poll_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Client configuration pointing at the test servers.
pub fn test_config(backend: &MockBackend, hub: &TestHub) -> Config {
    let mut config = Config::default();
    config.server.base_url = backend.base_url.clone();
    config.server.origin = backend.origin.clone();
    config.server.ws_url = hub.ws_url.clone();
    config.server.request_timeout = Duration::from_secs(5);
    config.channel.reconnect_delay = Duration::from_millis(200);
    config.channel.connect_timeout = Duration::from_secs(2);
    config.transfer.chunk_delay_ms = 1;
    config
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

enum HubCommand {
    Send(String),
    DropAbruptly,
}

struct Peer {
    id: usize,
    code: String,
    role: String,
    tx: mpsc::UnboundedSender<HubCommand>,
}

#[derive(Default)]
struct HubState {
    connections: AtomicUsize,
    next_id: AtomicUsize,
    peers: Mutex<Vec<Peer>>,
    log: Mutex<Vec<Value>>,
}

impl HubState {
    fn forward(&self, code: &str, role: &str, text: &str) {
        for peer in self.peers.lock().unwrap().iter() {
            if peer.code == code && peer.role == role {
                let _ = peer.tx.send(HubCommand::Send(text.to_string()));
            }
        }
    }
}

/// A minimal room hub relaying messages between senders and receivers.
pub struct TestHub {
    /// Endpoint to put in `server.ws_url`
    pub ws_url: String,
    state: Arc<HubState>,
    accept_task: JoinHandle<()>,
}

impl TestHub {
    /// Bind to an ephemeral port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HubState::default());

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_peer(stream, Arc::clone(&accept_state)));
            }
        });

        Self {
            ws_url: format!("ws://{addr}/ws/p2p"),
            state,
            accept_task,
        }
    }

    /// WebSocket handshakes completed so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Peers that announced themselves with `connect`.
    pub fn peer_count(&self) -> usize {
        self.state.peers.lock().unwrap().len()
    }

    /// Wait until at least `n` handshakes have completed.
    pub async fn wait_for_connections(&self, n: usize) {
        poll_until(&format!("{n} hub connection(s)"), || {
            self.connection_count() >= n
        })
        .await;
    }

    /// Wait until exactly `n` peers are registered.
    pub async fn wait_for_peers(&self, n: usize) {
        poll_until(&format!("{n} hub peer(s)"), || self.peer_count() == n).await;
    }

    /// Wait until at least `n` envelopes of type `kind` were received.
    pub async fn wait_for_received(&self, kind: &str, n: usize) {
        poll_until(&format!("{n} '{kind}' message(s)"), || {
            self.received(kind).len() >= n
        })
        .await;
    }

    /// Cut every connection without a close frame.
    pub fn drop_all(&self) {
        for peer in self.state.peers.lock().unwrap().iter() {
            let _ = peer.tx.send(HubCommand::DropAbruptly);
        }
    }

    /// Stop accepting new connections.
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }

    /// Push a message to every peer of `code` with `role`.
    pub fn push(&self, code: &str, role: &str, message: &Value) {
        self.state.forward(code, role, &message.to_string());
    }

    /// Every envelope the hub received with the given `type`.
    pub fn received(&self, kind: &str) -> Vec<Value> {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m["type"] == kind)
            .cloned()
            .collect()
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_all();
    }
}

async fn serve_peer(stream: TcpStream, state: Arc<HubState>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);

    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut incoming) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut room: Option<(String, String)> = None;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(HubCommand::Send(text)) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(HubCommand::DropAbruptly) | None => break,
            },
            message = incoming.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    state.log.lock().unwrap().push(envelope.clone());

                    let kind = envelope["type"].as_str().unwrap_or_default().to_string();
                    if kind == "connect" {
                        let code = envelope["payload"]["code"].as_str().unwrap_or_default().to_string();
                        let role = envelope["payload"]["role"].as_str().unwrap_or_default().to_string();
                        state.peers.lock().unwrap().push(Peer {
                            id,
                            code: code.clone(),
                            role: role.clone(),
                            tx: tx.clone(),
                        });
                        room = Some((code, role));
                        let ack = json!({"type": "connection-established", "payload": {}});
                        let _ = tx.send(HubCommand::Send(ack.to_string()));
                        continue;
                    }

                    let Some((code, _)) = &room else {
                        continue;
                    };
                    match kind.as_str() {
                        "file-request" => state.forward(code, "sender", &text),
                        "file-info" | "file-chunk" | "file-complete" => {
                            state.forward(code, "receiver", &text);
                        }
                        "update-file-list" => {
                            let update = json!({
                                "type": "file-list-updated",
                                "payload": envelope["payload"],
                            });
                            state.forward(code, "receiver", &update.to_string());
                        }
                        _ => {}
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.peers.lock().unwrap().retain(|p| p.id != id);
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendData {
    rooms: HashMap<String, Vec<Value>>,
    texts: HashMap<String, String>,
    room_info_calls: usize,
    room_info_delay: Duration,
    next_code: usize,
}

impl BackendData {
    fn mint_code(&mut self) -> String {
        self.next_code += 1;
        format!("RM{:04}", self.next_code)
    }
}

type Shared = Arc<Mutex<BackendData>>;

/// A mock of the room backend's HTTP contract.
pub struct MockBackend {
    /// Root of the HTTP API
    pub base_url: String,
    /// Origin links are built on
    pub origin: String,
    data: Shared,
    task: JoinHandle<()>,
}

impl MockBackend {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let data: Shared = Arc::default();
        let app = Router::new()
            .route("/api/create-room", post(create_room))
            .route("/api/room-info", get(room_info))
            .route("/api/room-status", get(room_status))
            .route("/api/create-text-room", post(create_text_room))
            .route("/api/get-text-content/{code}", get(get_text_content))
            .with_state(Arc::clone(&data));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}/api"),
            origin: format!("http://{addr}"),
            data,
            task,
        }
    }

    /// Register a room advertising `files`.
    pub fn add_room(&self, code: &str, files: Vec<Value>) {
        self.data
            .lock()
            .unwrap()
            .rooms
            .insert(code.to_string(), files);
    }

    /// Delay every `room-info` answer.
    pub fn set_room_info_delay(&self, delay: Duration) {
        self.data.lock().unwrap().room_info_delay = delay;
    }

    /// Number of `room-info` requests served.
    pub fn room_info_calls(&self) -> usize {
        self.data.lock().unwrap().room_info_calls
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn create_room(State(data): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let files = body["files"].as_array().cloned().unwrap_or_default();
    let mut data = data.lock().unwrap();
    let code = data.mint_code();
    data.rooms.insert(code.clone(), files);
    Json(json!({"success": true, "code": code}))
}

async fn room_info(
    State(data): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let delay = {
        let mut data = data.lock().unwrap();
        data.room_info_calls += 1;
        data.room_info_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let code = query.get("code").cloned().unwrap_or_default();
    let files = data.lock().unwrap().rooms.get(&code).cloned();
    match files {
        Some(files) => Json(json!({"success": true, "files": files})),
        None => Json(json!({"success": false, "message": "room not found or expired"})),
    }
}

async fn room_status(
    State(data): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let code = query.get("code").cloned().unwrap_or_default();
    let file_count = data.lock().unwrap().rooms.get(&code).map(Vec::len);
    match file_count {
        Some(file_count) => (
            StatusCode::OK,
            Json(json!({
                "code": code,
                "file_count": file_count,
                "sender_count": 1,
                "receiver_count": 0,
                "clients": [{
                    "id": "c1",
                    "role": "sender",
                    "joined_at": "2024-05-01T12:00:00Z",
                    "user_agent": "test"
                }],
                "created_at": "2024-05-01T12:00:00Z"
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "room not found"})),
        ),
    }
}

async fn create_text_room(
    State(data): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    if text.is_empty() || text.chars().count() > 50_000 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "invalid text"})),
        );
    }
    let mut data = data.lock().unwrap();
    let code = data.mint_code();
    data.texts.insert(code.clone(), text);
    (StatusCode::OK, Json(json!({"code": code})))
}

async fn get_text_content(
    State(data): State<Shared>,
    Path(code): Path<String>,
) -> (StatusCode, Json<Value>) {
    if code.len() != 6 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "invalid code"})),
        );
    }
    match data.lock().unwrap().texts.get(&code) {
        Some(text) => (StatusCode::OK, Json(json!({"text": text}))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "not found"})),
        ),
    }
}
