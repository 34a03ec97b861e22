//! Room channel wire protocol.
//!
//! Every frame on the channel is a JSON text message shaped as an
//! envelope:
//!
//! ```text
//! { "type": "<message-type>", "payload": { ... } }
//! ```
//!
//! ## Message Types
//!
//! | type | direction | payload |
//! |------|-----------|---------|
//! | `connect` | client → hub | `code`, `role`, `timestamp` |
//! | `update-file-list` | sender → hub | `files` |
//! | `file-list` / `file-list-updated` | hub → receiver | `files` |
//! | `room-status` | hub → both | [`RoomStatus`] |
//! | `file-request` | receiver → sender | `file_id`, `request_id` |
//! | `file-info` | sender → receiver | `file_id`, `name`, `size`, `mime_type`, `last_modified` |
//! | `file-chunk` | sender → receiver | `file_id`, `offset`, `data`, `is_last` |
//! | `file-complete` | sender → receiver | `file_id` |
//! | `connected` / `connection-established` | hub → client | none |
//!
//! In `file-info`, `file-chunk` and `file-complete` the `file_id` field
//! carries the receiver's request id, not the advertised file id.
//!
//! Unknown types decode to [`Message::Other`] so newer hubs do not break
//! older clients.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::code::RoomCode;
use crate::error::{Error, Result};
use crate::file::FileDescriptor;

/// Which end of a room this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Offers files and answers requests
    Sender,
    /// Pulls files from the sender
    Receiver,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `connect` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    /// Room code
    pub code: String,
    /// Joining role
    pub role: Role,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// `update-file-list`, `file-list` and `file-list-updated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListPayload {
    /// Advertised files
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// `file-request` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    /// Advertised file id being pulled
    pub file_id: String,
    /// Receiver-minted transfer id
    pub request_id: String,
}

/// `file-info` payload; opens a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Transfer (request) id
    pub file_id: String,
    /// Display name
    pub name: String,
    /// Declared total size
    pub size: u64,
    /// MIME type
    #[serde(default)]
    pub mime_type: String,
    /// Last-modified time in Unix milliseconds
    #[serde(default)]
    pub last_modified: Option<i64>,
}

/// `file-chunk` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Transfer (request) id
    pub file_id: String,
    /// Byte offset within the whole file
    pub offset: u64,
    /// Chunk bytes, serialized as a JSON number array
    pub data: Vec<u8>,
    /// Sender's hint that this is the final chunk
    #[serde(default)]
    pub is_last: bool,
}

/// `file-complete` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileComplete {
    /// Transfer (request) id
    pub file_id: String,
}

/// A client connected to a room, as reported by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Hub-assigned client id
    pub id: String,
    /// Role in the room
    pub role: Role,
    /// Join time
    pub joined_at: DateTime<Utc>,
    /// Reported user agent
    #[serde(default)]
    pub user_agent: String,
}

/// Presence snapshot for a room. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatus {
    /// Room code
    pub code: String,
    /// Number of advertised files
    #[serde(default)]
    pub file_count: usize,
    /// Connected senders
    #[serde(default)]
    pub sender_count: usize,
    /// Connected receivers
    #[serde(default)]
    pub receiver_count: usize,
    /// Connected clients
    #[serde(default)]
    pub clients: Vec<ClientInfo>,
    /// Room creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A typed channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Join announcement sent right after the socket opens
    Connect(ConnectPayload),
    /// Sender replaces its advertised file set
    UpdateFileList(FileListPayload),
    /// Initial file advertisement
    FileList(FileListPayload),
    /// Incremental file advertisement
    FileListUpdated(FileListPayload),
    /// Presence snapshot
    RoomStatus(RoomStatus),
    /// Pull request
    FileRequest(FileRequest),
    /// Transfer metadata
    FileInfo(FileInfo),
    /// One chunk
    FileChunk(FileChunk),
    /// Authoritative completion
    FileComplete(FileComplete),
    /// `connected` liveness confirmation
    Connected,
    /// `connection-established` liveness confirmation
    ConnectionEstablished,
    /// Any type this client does not understand
    Other {
        /// Raw type string
        kind: String,
        /// Raw payload
        payload: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize)]
struct EnvelopeRef<'a, P: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: P,
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::ProtocolError(format!("bad '{kind}' payload: {e}")))
}

impl Message {
    /// Wire name of this message's type.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Connect(_) => "connect",
            Self::UpdateFileList(_) => "update-file-list",
            Self::FileList(_) => "file-list",
            Self::FileListUpdated(_) => "file-list-updated",
            Self::RoomStatus(_) => "room-status",
            Self::FileRequest(_) => "file-request",
            Self::FileInfo(_) => "file-info",
            Self::FileChunk(_) => "file-chunk",
            Self::FileComplete(_) => "file-complete",
            Self::Connected => "connected",
            Self::ConnectionEstablished => "connection-established",
            Self::Other { kind, .. } => kind.as_str(),
        }
    }

    /// Build the `connect` announcement for `code`/`role`.
    #[must_use]
    pub fn connect(code: &RoomCode, role: Role) -> Self {
        Self::Connect(ConnectPayload {
            code: code.to_string(),
            role,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Serialize into a `{type, payload}` envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload fails to serialize.
    pub fn encode(&self) -> Result<String> {
        let kind = self.kind();
        let json = match self {
            Self::Connect(p) => serde_json::to_string(&EnvelopeRef { kind, payload: p }),
            Self::UpdateFileList(p) | Self::FileList(p) | Self::FileListUpdated(p) => {
                serde_json::to_string(&EnvelopeRef { kind, payload: p })
            }
            Self::RoomStatus(p) => serde_json::to_string(&EnvelopeRef { kind, payload: p }),
            Self::FileRequest(p) => serde_json::to_string(&EnvelopeRef { kind, payload: p }),
            Self::FileInfo(p) => serde_json::to_string(&EnvelopeRef { kind, payload: p }),
            Self::FileChunk(p) => serde_json::to_string(&EnvelopeRef { kind, payload: p }),
            Self::FileComplete(p) => serde_json::to_string(&EnvelopeRef { kind, payload: p }),
            Self::Connected | Self::ConnectionEstablished => serde_json::to_string(
                &EnvelopeRef {
                    kind,
                    payload: Value::Object(serde_json::Map::new()),
                },
            ),
            Self::Other { payload, .. } => {
                serde_json::to_string(&EnvelopeRef { kind, payload })
            }
        }?;
        Ok(json)
    }

    /// Parse a `{type, payload}` envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not an envelope or a known type
    /// carries a malformed payload.
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| Error::ProtocolError(format!("not an envelope: {e}")))?;
        let kind = raw.kind.as_str();
        let value = raw.payload;

        Ok(match kind {
            "connect" => Self::Connect(payload(kind, value)?),
            "update-file-list" => Self::UpdateFileList(payload(kind, value)?),
            "file-list" => Self::FileList(payload(kind, value)?),
            "file-list-updated" => Self::FileListUpdated(payload(kind, value)?),
            "room-status" => Self::RoomStatus(payload(kind, value)?),
            "file-request" => Self::FileRequest(payload(kind, value)?),
            "file-info" => Self::FileInfo(payload(kind, value)?),
            "file-chunk" => Self::FileChunk(payload(kind, value)?),
            "file-complete" => Self::FileComplete(payload(kind, value)?),
            "connected" => Self::Connected,
            "connection-established" => Self::ConnectionEstablished,
            _ => Self::Other {
                kind: kind.to_string(),
                payload: value,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_envelope() {
        let code = RoomCode::parse("abc123").unwrap();
        let text = Message::connect(&code, Role::Receiver).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "connect");
        assert_eq!(value["payload"]["code"], "ABC123");
        assert_eq!(value["payload"]["role"], "receiver");
        assert!(value["payload"]["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_chunk_data_is_number_array() {
        let msg = Message::FileChunk(FileChunk {
            file_id: "req_1".into(),
            offset: 65_536,
            data: vec![0, 255, 7],
            is_last: true,
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "file-chunk");
        assert_eq!(value["payload"]["data"], serde_json::json!([0, 255, 7]));
        assert_eq!(value["payload"]["offset"], 65_536);
        assert_eq!(value["payload"]["is_last"], true);
    }

    #[test]
    fn test_decode_hub_messages() {
        let msg = Message::decode(
            r#"{"type":"file-list","payload":{"files":[{"id":"file_0","name":"a.bin","size":196608,"type":"application/octet-stream"}]}}"#,
        )
        .unwrap();
        let Message::FileList(list) = msg else {
            panic!("expected file-list");
        };
        assert_eq!(list.files[0].size, 196_608);

        assert_eq!(
            Message::decode(r#"{"type":"connected"}"#).unwrap(),
            Message::Connected
        );
        assert_eq!(
            Message::decode(r#"{"type":"connection-established","payload":null}"#).unwrap(),
            Message::ConnectionEstablished
        );
    }

    #[test]
    fn test_decode_room_status() {
        let msg = Message::decode(
            r#"{"type":"room-status","payload":{"code":"ABC123","file_count":2,"sender_count":1,"receiver_count":1,
                "clients":[{"id":"c1","role":"sender","joined_at":"2024-05-01T10:00:00Z","user_agent":"ua"}],
                "created_at":"2024-05-01T09:59:00Z"}}"#,
        )
        .unwrap();
        let Message::RoomStatus(status) = msg else {
            panic!("expected room-status");
        };
        assert_eq!(status.file_count, 2);
        assert_eq!(status.clients[0].role, Role::Sender);
    }

    #[test]
    fn test_decode_unknown_type() {
        let msg = Message::decode(r#"{"type":"text-content","payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(msg.kind(), "text-content");
        assert!(matches!(msg, Message::Other { .. }));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(Message::decode("not json").is_err());
        assert!(Message::decode(r#"{"payload":{}}"#).is_err());
        assert!(Message::decode(r#"{"type":"file-chunk","payload":{"file_id":"x"}}"#).is_err());
    }

    #[test]
    fn test_request_roundtrip_fields() {
        let msg = Message::FileRequest(FileRequest {
            file_id: "file_0".into(),
            request_id: "req_1_abc".into(),
        });
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
