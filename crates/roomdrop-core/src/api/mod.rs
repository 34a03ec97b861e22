//! Client for the room-lifecycle HTTP backend.
//!
//! The backend owns rooms: it issues codes, remembers which files a room
//! advertises, stores text payloads and reports who is connected. Payload
//! bytes never pass through it.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | Create room | `POST {base}/create-room` |
//! | Create text room | `POST {base}/create-text-room` |
//! | Fetch text | `GET {base}/get-text-content/{code}` |
//! | Room info | `GET {base}/room-info?code=` |
//! | Room status | `GET {base}/room-status?code=` |

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::code::RoomCode;
use crate::error::{Error, Result};
use crate::file::FileDescriptor;
use crate::protocol::RoomStatus;

/// Maximum characters accepted for a text room.
pub const MAX_TEXT_LEN: usize = crate::MAX_TEXT_LEN;

/// Backend client settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Root of the HTTP API, e.g. `http://localhost:8080/api`
    pub base_url: String,
    /// Public origin used for shareable links
    pub origin: String,
    /// Timeout for a single request
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            origin: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Check a text payload against the backend limits before sending it.
///
/// Length is counted in characters, not bytes.
///
/// # Errors
///
/// Returns [`Error::TextEmpty`] or [`Error::TextTooLong`].
pub fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::TextEmpty);
    }
    let len = text.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(Error::TextTooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

#[derive(Serialize)]
struct CreateRoomRequest<'a> {
    files: &'a [FileDescriptor],
}

#[derive(Serialize)]
struct CreateTextRoomRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateRoomResponse {
    #[serde(default)]
    success: bool,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    code: String,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct RoomInfoResponse {
    #[serde(default)]
    success: bool,
    files: Option<Vec<FileDescriptor>>,
    room: Option<RoomInfoBody>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomInfoBody {
    #[serde(default)]
    files: Vec<FileDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self, status: StatusCode) -> String {
        self.message
            .or(self.error)
            .unwrap_or_else(|| status.to_string())
    }
}

/// HTTP client for the room backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    config: ApiConfig,
}

impl BackendClient {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Get the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Create a file room advertising `files`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomCreation`] if the backend refuses, or a transport error.
    pub async fn create_room(&self, files: &[FileDescriptor]) -> Result<RoomCode> {
        let response = self
            .client
            .post(self.url("create-room"))
            .json(&CreateRoomRequest { files })
            .send()
            .await?;

        let status = response.status();
        let body: CreateRoomResponse = response
            .json()
            .await
            .map_err(|e| Error::RoomCreation(format!("unreadable response ({status}): {e}")))?;

        match body {
            CreateRoomResponse {
                success: true,
                code: Some(code),
                ..
            } => {
                let code = RoomCode::parse(&code)?;
                tracing::info!("Created room {code}");
                Ok(code)
            }
            CreateRoomResponse { message, .. } => Err(Error::RoomCreation(
                message.unwrap_or_else(|| status.to_string()),
            )),
        }
    }

    /// Store `text` in a new text room.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any request is made, or
    /// [`Error::Backend`] if the backend rejects the text.
    pub async fn create_text_room(&self, text: &str) -> Result<RoomCode> {
        validate_text(text)?;

        let response = self
            .client
            .post(self.url("create-text-room"))
            .json(&CreateTextRoomRequest { text })
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let body: CodeResponse = response.json().await?;
        RoomCode::parse(&body.code)
    }

    /// Fetch the text stored under `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomNotFound`] on 404 and [`Error::InvalidCodeFormat`] on 400.
    pub async fn get_text_content(&self, code: &RoomCode) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("get-text-content/{code}")))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::RoomNotFound(code.to_string())),
            StatusCode::BAD_REQUEST => {
                let body: ErrorBody = response.json().await.unwrap_or_default();
                Err(Error::InvalidCodeFormat(
                    body.into_message(StatusCode::BAD_REQUEST),
                ))
            }
            _ => {
                let response = ensure_success(response).await?;
                let body: TextResponse = response.json().await?;
                Ok(body.text)
            }
        }
    }

    /// Look up the files advertised by room `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomNotFound`] if the room does not exist, or
    /// [`Error::RoomLookup`] for any other failure.
    pub async fn room_info(&self, code: &RoomCode) -> Result<Vec<FileDescriptor>> {
        let response = self
            .client
            .get(self.url("room-info"))
            .query(&[("code", code.as_str())])
            .send()
            .await
            .map_err(|e| Error::RoomLookup(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::RoomNotFound(code.to_string()));
        }

        let body: RoomInfoResponse = response
            .json()
            .await
            .map_err(|e| Error::RoomLookup(format!("unreadable response ({status}): {e}")))?;

        if !body.success {
            tracing::debug!(
                "Room {code} lookup refused: {}",
                body.message.as_deref().unwrap_or("no message")
            );
            return Err(Error::RoomNotFound(code.to_string()));
        }
        if !status.is_success() {
            return Err(Error::RoomLookup(status.to_string()));
        }

        Ok(body
            .files
            .or_else(|| body.room.map(|room| room.files))
            .unwrap_or_default())
    }

    /// Fetch the presence snapshot of room `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] carrying the backend's status code on failure.
    pub async fn room_status(&self, code: &RoomCode) -> Result<RoomStatus> {
        let response = self
            .client
            .get(self.url("room-status"))
            .query(&[("code", code.as_str())])
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: ErrorBody = response.json().await.unwrap_or_default();
    Err(Error::Backend {
        status: status.as_u16(),
        message: body.into_message(status),
    })
}
