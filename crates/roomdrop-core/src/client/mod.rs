//! A complete room client.
//!
//! [`Client`] wires one [`RoomSession`] (and through it one [`Channel`]) to
//! the chunk sender, the chunk receiver and the progress list, then routes
//! every channel event to the component that owns it:
//!
//! | Role | Messages handled |
//! |------|------------------|
//! | receiver | `file-info`, `file-chunk`, `file-complete`, `file-list`, `file-list-updated` |
//! | sender | `file-request` |
//! | both | `room-status`, `connected`, `connection-established` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use roomdrop_core::{client::Client, config::Config};
//!
//! let (client, mut outputs) = Client::new(&Config::load()?)?;
//! client.spawn().await?;
//! client.join(&code).await?;
//! client.request_file("file_0").await?;
//! while let Some(payload) = outputs.completed.recv().await {
//!     payload.save_to(&dir).await?;
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::api::BackendClient;
use crate::channel::{Channel, ChannelEvent, NORMAL_CLOSURE};
use crate::code::RoomCode;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::OfferedFile;
use crate::protocol::{FileRequest, Message, Role};
use crate::session::{JoinOutcome, RoomCreated, RoomSession};
use crate::transfer::{
    new_transfer_id, ChunkedReceiver, ChunkedSender, CompletedPayload, ProgressEntry,
    ProgressTracker, TransferEvent,
};

/// How often lingering progress entries are pruned.
const PRUNE_INTERVAL: Duration = Duration::from_millis(250);

/// Streams a client produces for its owner.
#[derive(Debug)]
pub struct ClientOutputs {
    /// Every assembled download, exactly once per transfer id
    pub completed: mpsc::UnboundedReceiver<CompletedPayload>,
    /// Latest progress list
    pub progress: watch::Receiver<Vec<ProgressEntry>>,
}

/// A room client.
///
/// Cloning yields another handle to the same client.
#[derive(Debug, Clone)]
pub struct Client {
    session: RoomSession,
    sender: ChunkedSender,
    receiver: Arc<Mutex<ChunkedReceiver>>,
    progress: Arc<Mutex<ProgressTracker>>,
    progress_tx: Arc<watch::Sender<Vec<ProgressEntry>>>,
    completed_tx: mpsc::UnboundedSender<CompletedPayload>,
    transfer_events: Arc<Mutex<Option<mpsc::UnboundedReceiver<TransferEvent>>>>,
}

impl Client {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<(Self, ClientOutputs)> {
        let channel = Channel::new(config.channel_config());
        let api = BackendClient::new(config.api_config())?;
        let session = RoomSession::new(channel.clone(), api);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sender = ChunkedSender::new(channel, config.sender_config(), events_tx);

        let (progress_tx, progress_rx) = watch::channel(Vec::new());
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();

        let client = Self {
            session,
            sender,
            receiver: Arc::new(Mutex::new(ChunkedReceiver::new())),
            progress: Arc::new(Mutex::new(ProgressTracker::new(
                config.transfer.progress_linger,
            ))),
            progress_tx: Arc::new(progress_tx),
            completed_tx,
            transfer_events: Arc::new(Mutex::new(Some(events_rx))),
        };

        Ok((
            client,
            ClientOutputs {
                completed: completed_rx,
                progress: progress_rx,
            },
        ))
    }

    /// Start routing channel events.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is already running.
    pub async fn spawn(&self) -> Result<JoinHandle<()>> {
        let transfer_events = self
            .transfer_events
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("client is already running".into()))?;
        let channel_events = self.session.channel().subscribe().await;

        let client = self.clone();
        Ok(tokio::spawn(async move {
            client.run(channel_events, transfer_events).await;
        }))
    }

    async fn run(
        self,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = channel_events.recv() => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => break,
                },
                Some(event) = transfer_events.recv() => {
                    self.apply(&event).await;
                }
                _ = prune.tick() => {
                    let pruned = self.progress.lock().await.prune();
                    if pruned {
                        self.publish_progress().await;
                    }
                }
            }
        }
    }

    /// The room session.
    #[must_use]
    pub const fn session(&self) -> &RoomSession {
        &self.session
    }

    /// Offer `files` in a new room and connect as sender.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomCreation`] if the backend refuses.
    pub async fn share(&self, files: Vec<OfferedFile>) -> Result<RoomCreated> {
        self.sender.set_files(files).await;
        let descriptors = self.sender.descriptors().await;
        self.session.create_room(&descriptors).await
    }

    /// Replace the offered files and advertise the new set.
    ///
    /// Returns whether the update reached an open channel.
    pub async fn update_files(&self, files: Vec<OfferedFile>) -> bool {
        self.sender.set_files(files).await;
        let descriptors = self.sender.descriptors().await;
        self.session.update_file_list(&descriptors).await
    }

    /// Join room `code` as receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomNotFound`] or [`Error::RoomLookup`].
    pub async fn join(&self, code: &RoomCode) -> Result<JoinOutcome> {
        self.session.join_room(code).await
    }

    /// Pull the offered file `file_id` from the sender.
    ///
    /// Returns the new transfer id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotOpen`] if the channel is not open and
    /// [`Error::TransferInProgress`] if the file is already being fetched.
    pub async fn request_file(&self, file_id: &str) -> Result<String> {
        if !self.session.channel().is_open().await {
            return Err(Error::ChannelNotOpen);
        }

        let name = self
            .session
            .receiver_files()
            .await
            .into_iter()
            .find(|f| f.id == file_id)
            .map_or_else(|| file_id.to_string(), |f| f.name);

        let transfer_id = new_transfer_id();
        self.progress
            .lock()
            .await
            .begin_request(&transfer_id, file_id, &name)?;
        self.publish_progress().await;

        let request = Message::FileRequest(FileRequest {
            file_id: file_id.to_string(),
            request_id: transfer_id.clone(),
        });
        if !self.session.channel().send(&request).await {
            self.progress
                .lock()
                .await
                .mark_error(&transfer_id, "request could not be sent");
            self.publish_progress().await;
            return Err(Error::ChannelNotOpen);
        }

        tracing::debug!("Requested {file_id} as {transfer_id}");
        Ok(transfer_id)
    }

    /// Current progress list.
    pub async fn progress_snapshot(&self) -> Vec<ProgressEntry> {
        self.progress.lock().await.snapshot()
    }

    /// Remove the progress entry of `transfer_id`.
    ///
    /// A failed entry blocks new requests for its file until it is
    /// dismissed. Returns whether an entry was removed.
    pub async fn dismiss(&self, transfer_id: &str) -> bool {
        let removed = self.progress.lock().await.dismiss(transfer_id);
        if removed {
            self.publish_progress().await;
        }
        removed
    }

    /// Leave the room and drop all transfer state.
    pub async fn reset(&self) {
        self.session.reset().await;
        self.receiver.lock().await.reset();
        self.progress.lock().await.reset();
        self.publish_progress().await;
    }

    async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => self.handle_message(message).await,
            ChannelEvent::Closed { code, .. } if code != NORMAL_CLOSURE => {
                self.fail_active("connection dropped").await;
            }
            ChannelEvent::ReconnectFailed => self.fail_active("connection lost").await,
            _ => {}
        }
    }

    async fn handle_message(&self, message: Message) {
        let role = self.session.role().await;

        match (role, message) {
            (Some(Role::Receiver), Message::FileInfo(info)) => {
                tracing::debug!("Receiving '{}' ({} bytes)", info.name, info.size);
                let event = self.receiver.lock().await.begin_transfer(&info);
                self.apply(&event).await;
            }
            (Some(Role::Receiver), Message::FileChunk(chunk)) => {
                let outcome = self.receiver.lock().await.receive_chunk(chunk);
                if let Some(outcome) = outcome {
                    self.apply(&outcome.event()).await;
                }
            }
            (Some(Role::Receiver), Message::FileComplete(complete)) => {
                let payload = self
                    .receiver
                    .lock()
                    .await
                    .complete_transfer(&complete.file_id);
                if let Some(payload) = payload {
                    self.apply(&TransferEvent::Completed {
                        transfer_id: payload.transfer_id.clone(),
                    })
                    .await;
                    let _ = self.completed_tx.send(payload);
                }
            }
            (Some(Role::Sender), Message::FileRequest(request)) => {
                let _ = self.sender.handle_request(&request).await;
            }
            (_, message) => {
                tracing::debug!("No handler for '{}' message", message.kind());
            }
        }
    }

    /// Mark every active transfer failed and drop its partial bytes.
    ///
    /// Transfers are not resumed, so none of them can finish after the
    /// channel closes abnormally.
    async fn fail_active(&self, reason: &str) {
        let active: Vec<String> = {
            let mut tracker = self.progress.lock().await;
            let active: Vec<String> = tracker
                .entries()
                .iter()
                .filter(|e| e.status.is_active())
                .map(|e| e.transfer_id.clone())
                .collect();
            for id in &active {
                tracker.mark_error(id, reason);
            }
            active
        };
        if active.is_empty() {
            return;
        }

        tracing::warn!("{} transfer(s) failed: {reason}", active.len());
        {
            let mut receiver = self.receiver.lock().await;
            for id in &active {
                receiver.abandon(id);
            }
        }
        self.publish_progress().await;
    }

    async fn apply(&self, event: &TransferEvent) {
        self.progress.lock().await.apply(event);
        self.publish_progress().await;
    }

    async fn publish_progress(&self) {
        let snapshot = self.progress.lock().await.snapshot();
        self.progress_tx.send_replace(snapshot);
    }
}
