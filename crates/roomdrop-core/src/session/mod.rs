//! Room lifecycle.
//!
//! A [`RoomSession`] turns room actions (create, join, update, leave) into
//! backend calls plus the matching [`Channel`] changes. The session owns
//! its channel; other components only subscribe to it.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OnceCell};

use crate::api::BackendClient;
use crate::channel::{Channel, ChannelEvent};
use crate::code::{LinkKind, LinkMode, RoomCode, ShareLink};
use crate::error::{Error, Result};
use crate::file::FileDescriptor;
use crate::protocol::{FileListPayload, Message, Role, RoomStatus};

/// A freshly created room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCreated {
    /// Code issued by the backend
    pub code: RoomCode,
    /// Link that opens the receiving side
    pub link: ShareLink,
}

/// Result of [`RoomSession::join_room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room was found and the channel is connecting
    Joined(Vec<FileDescriptor>),
    /// Already connected to this room
    AlreadyJoined,
    /// Another join is still in flight
    InFlight,
}

#[derive(Debug, Default)]
struct SessionState {
    code: Option<RoomCode>,
    role: Option<Role>,
    link: Option<ShareLink>,
    joining: bool,
    receiver_files: Vec<FileDescriptor>,
    status: Option<RoomStatus>,
}

impl SessionState {
    fn apply(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connected { code, .. } => {
                if self.code.as_ref() == Some(code) {
                    self.joining = false;
                }
            }
            ChannelEvent::ReconnectFailed
            | ChannelEvent::Message(Message::Connected | Message::ConnectionEstablished) => {
                self.joining = false;
            }
            ChannelEvent::Message(Message::FileList(list) | Message::FileListUpdated(list)) => {
                if self.role == Some(Role::Receiver) {
                    tracing::debug!("Room advertises {} file(s)", list.files.len());
                    self.receiver_files.clone_from(&list.files);
                }
            }
            ChannelEvent::Message(Message::RoomStatus(status)) => {
                self.status = Some(status.clone());
            }
            _ => {}
        }
    }
}

/// Binds one room code and role to a channel.
#[derive(Debug, Clone)]
pub struct RoomSession {
    channel: Channel,
    api: BackendClient,
    state: Arc<Mutex<SessionState>>,
    listener: Arc<OnceCell<()>>,
}

impl RoomSession {
    /// Create a session with no room.
    #[must_use]
    pub fn new(channel: Channel, api: BackendClient) -> Self {
        Self {
            channel,
            api,
            state: Arc::new(Mutex::new(SessionState::default())),
            listener: Arc::new(OnceCell::new()),
        }
    }

    /// Subscribe to the channel once, before the first connect.
    ///
    /// The listener holds the state weakly and stops with the channel or
    /// on the first event after the session is gone.
    async fn listen(&self) {
        self.listener
            .get_or_init(|| async {
                let events = self.channel.subscribe().await;
                tokio::spawn(track_channel(events, Arc::downgrade(&self.state)));
            })
            .await;
    }

    /// The channel owned by this session.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The backend client.
    #[must_use]
    pub const fn api(&self) -> &BackendClient {
        &self.api
    }

    fn link(&self, kind: LinkKind, code: &RoomCode) -> ShareLink {
        ShareLink::new(&self.api.config().origin, kind, LinkMode::Receive, code)
    }

    /// Create a file room and connect to it as sender.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomCreation`] if the backend refuses. Nothing is
    /// retried.
    pub async fn create_room(&self, files: &[FileDescriptor]) -> Result<RoomCreated> {
        let code = self.api.create_room(files).await?;
        let link = self.link(LinkKind::File, &code);
        self.listen().await;

        {
            let mut state = self.state.lock().await;
            state.code = Some(code.clone());
            state.role = Some(Role::Sender);
            state.link = Some(link.clone());
            state.receiver_files.clear();
            state.status = None;
        }

        self.channel.connect(code.clone(), Role::Sender).await;
        Ok(RoomCreated { code, link })
    }

    /// Join room `code` as receiver.
    ///
    /// Does nothing if this room is already joined or a join is in flight.
    /// The in-flight flag stays set until the channel reports the
    /// connection or gives up; the session watches its own channel for that.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomNotFound`] if the room does not exist and
    /// [`Error::RoomLookup`] for other lookup failures.
    pub async fn join_room(&self, code: &RoomCode) -> Result<JoinOutcome> {
        self.listen().await;
        {
            let mut state = self.state.lock().await;
            if state.joining {
                tracing::debug!("Join already in flight, ignoring join of {code}");
                return Ok(JoinOutcome::InFlight);
            }
            if state.code.as_ref() == Some(code) && self.channel.is_open().await {
                tracing::debug!("Already joined {code}");
                return Ok(JoinOutcome::AlreadyJoined);
            }
            state.joining = true;
        }

        let files = match self.api.room_info(code).await {
            Ok(files) => files,
            Err(e) => {
                self.state.lock().await.joining = false;
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock().await;
            if !state.joining {
                tracing::debug!("Session reset while joining {code}");
                return Err(Error::NoActiveRoom);
            }
            state.code = Some(code.clone());
            state.role = Some(Role::Receiver);
            state.link = Some(self.link(LinkKind::File, code));
            state.receiver_files.clone_from(&files);
            state.status = None;
        }

        tracing::info!("Room {code} found with {} file(s)", files.len());
        self.channel.connect(code.clone(), Role::Receiver).await;
        Ok(JoinOutcome::Joined(files))
    }

    /// Advertise a new file set.
    ///
    /// Silently does nothing without a room or an open channel. Returns
    /// whether the update was sent.
    pub async fn update_file_list(&self, files: &[FileDescriptor]) -> bool {
        let has_room = self.state.lock().await.code.is_some();
        if !has_room || !self.channel.is_open().await {
            tracing::debug!("No open room, file list not sent");
            return false;
        }

        self.channel
            .send(&Message::UpdateFileList(FileListPayload {
                files: files.to_vec(),
            }))
            .await
    }

    /// Forget the room and close the channel.
    ///
    /// The backend is not told; it expires rooms on its own.
    pub async fn reset(&self) {
        *self.state.lock().await = SessionState::default();
        self.channel.disconnect().await;
    }

    /// Fetch the presence snapshot of the current room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveRoom`] without a room, or the backend error.
    pub async fn refresh_status(&self) -> Result<RoomStatus> {
        let code = self.code().await.ok_or(Error::NoActiveRoom)?;
        let status = self.api.room_status(&code).await?;
        self.state.lock().await.status = Some(status.clone());
        Ok(status)
    }

    /// Store `text` in a new text room.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or oversized text, or the
    /// backend error.
    pub async fn create_text_room(&self, text: &str) -> Result<RoomCreated> {
        let code = self.api.create_text_room(text).await?;
        let link = self.link(LinkKind::Text, &code);
        Ok(RoomCreated { code, link })
    }

    /// Fetch the text stored in room `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomNotFound`] if there is no such text room.
    pub async fn fetch_text(&self, code: &RoomCode) -> Result<String> {
        self.api.get_text_content(code).await
    }

    #[cfg(test)]
    async fn on_channel_event(&self, event: &ChannelEvent) {
        self.state.lock().await.apply(event);
    }

    /// Current room code.
    pub async fn code(&self) -> Option<RoomCode> {
        self.state.lock().await.code.clone()
    }

    /// Current role.
    pub async fn role(&self) -> Option<Role> {
        self.state.lock().await.role
    }

    /// Shareable link for the current room.
    pub async fn share_link(&self) -> Option<ShareLink> {
        self.state.lock().await.link.clone()
    }

    /// Whether a join is in flight.
    pub async fn is_joining(&self) -> bool {
        self.state.lock().await.joining
    }

    /// Files the room advertises to this receiver.
    pub async fn receiver_files(&self) -> Vec<FileDescriptor> {
        self.state.lock().await.receiver_files.clone()
    }

    /// Last known presence snapshot.
    pub async fn status(&self) -> Option<RoomStatus> {
        self.state.lock().await.status.clone()
    }
}

async fn track_channel(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ChannelEvent>,
    state: Weak<Mutex<SessionState>>,
) {
    while let Some(event) = events.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        state.lock().await.apply(&event);
    }
}
