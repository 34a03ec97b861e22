//! Error types for Roomdrop.
//!
//! This module provides a unified error type for all Roomdrop operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Roomdrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Roomdrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid room code format
    #[error("invalid room code: {0}")]
    InvalidCodeFormat(String),

    /// Text payload is empty (E001)
    #[error("text content cannot be empty")]
    TextEmpty,

    /// Text payload exceeds the backend limit (E002)
    #[error("text is too long: {len} characters, maximum is {max}")]
    TextTooLong {
        /// Characters submitted
        len: usize,
        /// Maximum accepted
        max: usize,
    },

    /// Backend refused to create a room (E003)
    #[error("failed to create room: {0}")]
    RoomCreation(String),

    /// Room does not exist or has expired (E004)
    #[error("room '{0}' not found or expired")]
    RoomNotFound(String),

    /// Room lookup failed for a reason other than not-found (E005)
    #[error("failed to look up room: {0}")]
    RoomLookup(String),

    /// Backend answered with a non-success status
    #[error("backend error ({status}): {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Message returned by the backend
        message: String,
    },

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The message channel is not open (E006)
    #[error("channel is not connected")]
    ChannelNotOpen,

    /// The message channel closed unexpectedly (E007)
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A transfer for this file is already running (E008)
    #[error("file '{0}' is already being transferred")]
    TransferInProgress(String),

    /// No room is active in this session
    #[error("no active room")]
    NoActiveRoom,

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::TextEmpty => Some("E001"),
            Self::TextTooLong { .. } => Some("E002"),
            Self::RoomCreation(_) => Some("E003"),
            Self::RoomNotFound(_) => Some("E004"),
            Self::RoomLookup(_) => Some("E005"),
            Self::ChannelNotOpen => Some("E006"),
            Self::ChannelClosed(_) => Some("E007"),
            Self::TransferInProgress(_) => Some("E008"),
            _ => None,
        }
    }

    /// Returns whether a person can reasonably retry the failed operation.
    ///
    /// Nothing in the library retries these automatically.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RoomLookup(_)
                | Self::Http(_)
                | Self::ChannelNotOpen
                | Self::ChannelClosed(_)
                | Self::Backend { .. }
        )
    }

    /// Returns whether this error was caused by invalid caller input.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCodeFormat(_) | Self::TextEmpty | Self::TextTooLong { .. }
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::RoomNotFound(_) => {
                Some("Check the code with the sender. Rooms expire when the sender leaves.")
            }
            Self::RoomLookup(_) | Self::Http(_) => Some(
                "Check that the server is reachable:\n\
                   roomdrop config show",
            ),
            Self::ChannelNotOpen | Self::ChannelClosed(_) => {
                Some("The connection to the room dropped. Join the room again.")
            }
            Self::TransferInProgress(_) => Some("Wait for the current download to finish."),
            _ => None,
        }
    }
}
