//! The message channel to the room hub.
//!
//! A [`Channel`] keeps at most one WebSocket connection for a
//! `(room code, role)` pair. Connection management runs in a single
//! supervised task per target:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Open
//!      ^                          |                  |
//!      |                      failure           abnormal close
//!      |                          v                  v
//!      +--- retry failed ---- wait reconnect_delay <-+
//! ```
//!
//! After an abnormal close (any close code other than 1000) exactly one
//! reconnect attempt is made. A successful reconnect re-arms the policy.
//! [`Channel::disconnect`] stops the task and no further attempt is made.
//!
//! Everything the channel observes is published on an event bus. Each
//! consumer takes its own receiver with [`Channel::subscribe`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::code::RoomCode;
use crate::protocol::{Message, Role};

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How long [`Channel::disconnect`] waits for the connection task to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Hub endpoint; `code` and `role` are appended as query parameters
    pub ws_url: String,
    /// Delay before the reconnect attempt
    pub reconnect_delay: Duration,
    /// Timeout for opening a connection
    pub connect_timeout: Duration,
    /// Frames that may wait in the outbound queue
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws/p2p".to_string(),
            reconnect_delay: Duration::from_secs(crate::DEFAULT_RECONNECT_DELAY_SECS),
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and none being opened
    Disconnected,
    /// A connection is being opened
    Connecting,
    /// The connection is open
    Open,
}

/// Everything a channel publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The connection opened
    Connected {
        /// Room the connection belongs to
        code: RoomCode,
        /// Role announced to the hub
        role: Role,
    },
    /// A message arrived from the hub
    Message(Message),
    /// An open connection closed
    Closed {
        /// WebSocket close code
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },
    /// A connection attempt failed
    Error(String),
    /// A reconnect attempt will be made after `delay`
    ReconnectScheduled {
        /// Time until the attempt
        delay: Duration,
    },
    /// The reconnect attempt failed; the channel gave up
    ReconnectFailed,
    /// An outgoing message was dropped
    SendDropped {
        /// Message type that was dropped
        kind: String,
    },
}

/// Fan-out of channel events to every subscriber.
#[derive(Debug, Default)]
struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl EventBus {
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    async fn publish(&self, event: ChannelEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Debug)]
struct Shared {
    phase: ChannelState,
    target: Option<(RoomCode, Role)>,
    outbound: Option<mpsc::Sender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

#[derive(Debug)]
struct Inner {
    config: ChannelConfig,
    bus: EventBus,
    shared: Mutex<Shared>,
}

impl Inner {
    /// Update shared state only if `generation` still owns the channel.
    async fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut Shared)) -> bool {
        let mut shared = self.shared.lock().await;
        if shared.generation == generation {
            f(&mut shared);
            true
        } else {
            false
        }
    }
}

/// How one connection attempt ended.
#[derive(Debug)]
enum ConnectionEnd {
    /// Stopped by `disconnect()` or a replacing `connect()`
    Shutdown,
    /// Could not open the connection
    Failed,
    /// An open connection closed
    Closed { code: u16 },
}

/// Handle to the room hub connection.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Create a disconnected channel.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                bus: EventBus::default(),
                shared: Mutex::new(Shared {
                    phase: ChannelState::Disconnected,
                    target: None,
                    outbound: None,
                    shutdown: None,
                    task: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Get the channel configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Receive every event published from now on.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        self.inner.bus.subscribe().await
    }

    /// Current connection state.
    pub async fn state(&self) -> ChannelState {
        self.inner.shared.lock().await.phase
    }

    /// Whether the connection is open.
    pub async fn is_open(&self) -> bool {
        self.state().await == ChannelState::Open
    }

    /// Room and role the channel is bound to, if any.
    pub async fn target(&self) -> Option<(RoomCode, Role)> {
        self.inner.shared.lock().await.target.clone()
    }

    /// Open a connection for `(code, role)`.
    ///
    /// Does nothing if a connection for the same pair is already open or
    /// being opened. Any other connection is closed first.
    pub async fn connect(&self, code: RoomCode, role: Role) {
        let previous = {
            let mut shared = self.inner.shared.lock().await;

            let same_target = shared
                .target
                .as_ref()
                .is_some_and(|(c, r)| *c == code && *r == role);
            if same_target && shared.phase != ChannelState::Disconnected {
                tracing::debug!("Channel already bound to {code} as {role}, skipping connect");
                return;
            }

            let previous = (shared.shutdown.take(), shared.task.take());

            shared.generation += 1;
            shared.target = Some((code.clone(), role));
            shared.phase = ChannelState::Connecting;
            shared.outbound = None;

            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            shared.shutdown = Some(shutdown_tx);
            shared.task = Some(tokio::spawn(supervise(
                Arc::clone(&self.inner),
                code,
                role,
                shared.generation,
                shutdown_rx,
            )));

            previous
        };

        stop_task(previous).await;
    }

    /// Close the connection with a normal closure and forget the room.
    ///
    /// Cancels a pending reconnect. No reconnect happens afterwards.
    pub async fn disconnect(&self) {
        let previous = {
            let mut shared = self.inner.shared.lock().await;
            shared.generation += 1;
            shared.target = None;
            shared.phase = ChannelState::Disconnected;
            shared.outbound = None;
            (shared.shutdown.take(), shared.task.take())
        };

        stop_task(previous).await;
    }

    /// Send a message if the connection is open.
    ///
    /// Messages are never queued for a later connection. While the channel
    /// is open this waits for room in the outbound queue, so the
    /// connection's write speed paces streaming producers. If the channel
    /// is not open the message is dropped, a warning is logged and
    /// [`ChannelEvent::SendDropped`] is published. Returns whether the
    /// message was accepted.
    pub async fn send(&self, message: &Message) -> bool {
        let Some(text) = encode(message) else {
            return false;
        };

        let outbound = {
            let shared = self.inner.shared.lock().await;
            if shared.phase == ChannelState::Open {
                shared.outbound.clone()
            } else {
                None
            }
        };

        let Some(tx) = outbound else {
            self.dropped(message, "channel is not open").await;
            return false;
        };

        if tx.send(text).await.is_err() {
            self.dropped(message, "connection closed").await;
            return false;
        }
        true
    }

    async fn dropped(&self, message: &Message, reason: &str) {
        tracing::warn!("Dropping '{}' message: {reason}", message.kind());
        self.inner
            .bus
            .publish(ChannelEvent::SendDropped {
                kind: message.kind().to_string(),
            })
            .await;
    }
}

fn encode(message: &Message) -> Option<String> {
    match message.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!("Failed to encode '{}' message: {e}", message.kind());
            None
        }
    }
}

async fn stop_task(previous: (Option<oneshot::Sender<()>>, Option<JoinHandle<()>>)) {
    let (shutdown, task) = previous;
    if let Some(shutdown) = shutdown {
        let _ = shutdown.send(());
    }
    if let Some(mut task) = task {
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            tracing::debug!("Channel task did not stop in time, aborting");
            task.abort();
        }
    }
}

/// Build the hub URL for a room and role.
///
/// # Errors
///
/// Returns an error if `ws_url` is not a valid URL.
pub fn endpoint(ws_url: &str, code: &RoomCode, role: Role) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(ws_url)?;
    url.query_pairs_mut()
        .append_pair("code", code.as_str())
        .append_pair("role", role.as_str());
    Ok(url)
}

/// Connection loop for one target, owned by one task.
async fn supervise(
    inner: Arc<Inner>,
    code: RoomCode,
    role: Role,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut retrying = false;

    loop {
        let end = run_connection(&inner, &code, role, generation, &mut shutdown).await;

        let abnormal = match end {
            ConnectionEnd::Shutdown => return,
            ConnectionEnd::Closed { code } => {
                retrying = false;
                code != NORMAL_CLOSURE
            }
            ConnectionEnd::Failed => true,
        };

        if !abnormal {
            inner
                .update_if_current(generation, |s| s.phase = ChannelState::Disconnected)
                .await;
            return;
        }

        if retrying {
            tracing::warn!("Reconnect to room {code} failed, giving up");
            inner
                .update_if_current(generation, |s| s.phase = ChannelState::Disconnected)
                .await;
            inner.bus.publish(ChannelEvent::ReconnectFailed).await;
            return;
        }

        let delay = inner.config.reconnect_delay;
        let still_current = inner
            .update_if_current(generation, |s| s.phase = ChannelState::Disconnected)
            .await;
        if !still_current {
            return;
        }

        tracing::info!("Reconnecting to room {code} in {delay:?}");
        inner
            .bus
            .publish(ChannelEvent::ReconnectScheduled { delay })
            .await;

        tokio::select! {
            _ = &mut shutdown => return,
            () = tokio::time::sleep(delay) => {}
        }

        let still_current = inner
            .update_if_current(generation, |s| s.phase = ChannelState::Connecting)
            .await;
        if !still_current {
            return;
        }
        retrying = true;
    }
}

async fn run_connection(
    inner: &Inner,
    code: &RoomCode,
    role: Role,
    generation: u64,
    shutdown: &mut oneshot::Receiver<()>,
) -> ConnectionEnd {
    let url = match endpoint(&inner.config.ws_url, code, role) {
        Ok(url) => url,
        Err(e) => {
            let message = format!("invalid hub URL '{}': {e}", inner.config.ws_url);
            tracing::warn!("{message}");
            inner.bus.publish(ChannelEvent::Error(message)).await;
            return ConnectionEnd::Failed;
        }
    };

    tracing::debug!("Connecting to {url}");

    let attempt = tokio::time::timeout(inner.config.connect_timeout, connect_async(url.as_str()));
    let stream = tokio::select! {
        _ = &mut *shutdown => return ConnectionEnd::Shutdown,
        result = attempt => match result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                let message = format!("connect failed: {e}");
                tracing::warn!("{message}");
                inner.bus.publish(ChannelEvent::Error(message)).await;
                return ConnectionEnd::Failed;
            }
            Err(_) => {
                let message = format!(
                    "connect timed out after {:?}",
                    inner.config.connect_timeout
                );
                tracing::warn!("{message}");
                inner.bus.publish(ChannelEvent::Error(message)).await;
                return ConnectionEnd::Failed;
            }
        },
    };

    let (mut sink, mut incoming) = stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(inner.config.outbound_capacity.max(1));

    let opened = inner
        .update_if_current(generation, |s| {
            s.phase = ChannelState::Open;
            s.outbound = Some(tx);
        })
        .await;
    if !opened {
        let _ = sink.send(close_message()).await;
        return ConnectionEnd::Shutdown;
    }

    tracing::info!("Connected to room {code} as {role}");
    inner
        .bus
        .publish(ChannelEvent::Connected {
            code: code.clone(),
            role,
        })
        .await;

    if let Some(hello) = encode(&Message::connect(code, role)) {
        if let Err(e) = sink.send(WsMessage::Text(hello)).await {
            tracing::warn!("Failed to announce join: {e}");
        }
    }

    let mut outbound_open = true;
    let (close_code, reason) = loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.send(close_message()).await;
                let _ = sink.close().await;
                inner
                    .bus
                    .publish(ChannelEvent::Closed {
                        code: NORMAL_CLOSURE,
                        reason: "User disconnected".to_string(),
                    })
                    .await;
                return ConnectionEnd::Shutdown;
            }
            frame = rx.recv(), if outbound_open => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        break (ABNORMAL_CLOSURE, e.to_string());
                    }
                }
                None => outbound_open = false,
            },
            received = incoming.next() => match received {
                Some(Ok(WsMessage::Text(text))) => match Message::decode(&text) {
                    Ok(message) => inner.bus.publish(ChannelEvent::Message(message)).await,
                    Err(e) => tracing::warn!("Ignoring undecodable message: {e}"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map_or((1005, String::new()), |f| {
                        (u16::from(f.code), f.reason.to_string())
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break (ABNORMAL_CLOSURE, e.to_string()),
                None => break (ABNORMAL_CLOSURE, "connection dropped".to_string()),
            },
        }
    };

    inner
        .update_if_current(generation, |s| {
            s.phase = ChannelState::Disconnected;
            s.outbound = None;
        })
        .await;

    if close_code == NORMAL_CLOSURE {
        tracing::info!("Room {code} connection closed");
    } else {
        tracing::warn!("Room {code} connection lost ({close_code}): {reason}");
    }
    inner
        .bus
        .publish(ChannelEvent::Closed {
            code: close_code,
            reason,
        })
        .await;

    ConnectionEnd::Closed { code: close_code }
}

fn close_message() -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "User disconnected".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> ChannelConfig {
        ChannelConfig {
            ws_url: "ws://127.0.0.1:1/ws/p2p".into(),
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
            outbound_capacity: 4,
        }
    }

    #[test]
    fn test_endpoint_query() {
        let code = RoomCode::parse("ab12cd").unwrap();
        let url = endpoint("ws://localhost:8080/ws/p2p", &code, Role::Receiver).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/ws/p2p?code=AB12CD&role=receiver"
        );
        assert!(endpoint("not a url", &code, Role::Sender).is_err());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let channel = Channel::new(quick_config());
        let mut events = channel.subscribe().await;

        let accepted = channel
            .send(&Message::FileComplete(crate::protocol::FileComplete {
                file_id: "req_1".into(),
            }))
            .await;

        assert!(!accepted);
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::SendDropped {
                kind: "file-complete".into()
            })
        );
    }

    #[tokio::test]
    async fn test_failed_connect_retries_once() {
        let channel = Channel::new(quick_config());
        let mut events = channel.subscribe().await;
        channel
            .connect(RoomCode::parse("AAAAAA").unwrap(), Role::Sender)
            .await;

        let mut errors = 0;
        let mut scheduled = 0;
        loop {
            match events.recv().await {
                Some(ChannelEvent::Error(_)) => errors += 1,
                Some(ChannelEvent::ReconnectScheduled { .. }) => scheduled += 1,
                Some(ChannelEvent::ReconnectFailed) | None => break,
                Some(_) => {}
            }
        }

        assert_eq!(errors, 2);
        assert_eq!(scheduled, 1);
        assert_eq!(channel.state().await, ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let mut config = quick_config();
        config.reconnect_delay = Duration::from_secs(60);
        let channel = Channel::new(config);
        let mut events = channel.subscribe().await;
        channel
            .connect(RoomCode::parse("AAAAAA").unwrap(), Role::Sender)
            .await;

        while let Some(event) = events.recv().await {
            if matches!(event, ChannelEvent::ReconnectScheduled { .. }) {
                break;
            }
        }

        channel.disconnect().await;
        assert_eq!(channel.state().await, ChannelState::Disconnected);
        assert!(channel.target().await.is_none());
        assert!(events.try_recv().is_err());
    }
}
