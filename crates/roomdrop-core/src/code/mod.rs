//! Room code validation and shareable links.
//!
//! Room codes are issued by the backend and handed between people
//! out-of-band. They are matched case-insensitively and always held in
//! upper case.
//!
//! ## Code Format
//!
//! - Exactly 6 characters
//! - ASCII letters and digits only
//! - Normalized to upper case on parse
//!
//! ## Example
//!
//! ```rust,ignore
//! use roomdrop_core::code::{RoomCode, ShareLink, LinkKind, LinkMode};
//!
//! let code = RoomCode::parse("ab12cd")?;
//! assert_eq!(code.as_str(), "AB12CD");
//!
//! let link = ShareLink::new("https://drop.example", LinkKind::File, LinkMode::Receive, &code);
//! println!("{link}");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{Error, Result};

/// Length of a room code
pub const CODE_LENGTH: usize = 6;

/// A validated room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode {
    code: String,
}

impl RoomCode {
    /// Parse and validate a room code from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is invalid (wrong length or invalid characters).
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_uppercase();

        let len = normalized.chars().count();
        if len != CODE_LENGTH {
            return Err(Error::InvalidCodeFormat(format!(
                "code must be {CODE_LENGTH} characters, got {len}"
            )));
        }

        if let Some(c) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCodeFormat(format!(
                "invalid character '{c}' in code"
            )));
        }

        Ok(Self { code: normalized })
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// Case-insensitive comparison against raw input.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        self.code.eq_ignore_ascii_case(input.trim())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl FromStr for RoomCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code)
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// What a shareable link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// File room
    File,
    /// Text room
    Text,
    /// Desktop stream room
    Desktop,
}

impl LinkKind {
    /// Query parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Text => "text",
            Self::Desktop => "desktop",
        }
    }

    fn from_param(value: &str) -> Option<Self> {
        match value {
            "file" => Some(Self::File),
            "text" => Some(Self::Text),
            "desktop" => Some(Self::Desktop),
            _ => None,
        }
    }
}

/// Which side the link opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Open the sending side
    Send,
    /// Open the receiving side
    Receive,
}

impl LinkMode {
    /// Query parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }

    fn from_param(value: &str) -> Option<Self> {
        match value {
            "send" => Some(Self::Send),
            "receive" => Some(Self::Receive),
            _ => None,
        }
    }
}

/// A shareable link carrying `type`, `mode` and `code` query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    /// Origin the link was built on (scheme + host + port)
    pub origin: String,
    /// Room kind
    pub kind: LinkKind,
    /// Side to open
    pub mode: LinkMode,
    /// Room code
    pub code: RoomCode,
}

impl ShareLink {
    /// Build a link for `code` on `origin`.
    #[must_use]
    pub fn new(origin: &str, kind: LinkKind, mode: LinkMode, code: &RoomCode) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            kind,
            mode,
            code: code.clone(),
        }
    }

    /// Parse a link produced by [`ShareLink::new`] (or by the web frontend).
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a URL or lacks a valid `code`.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| Error::InvalidCodeFormat(format!("not a link: {e}")))?;

        let mut kind = None;
        let mut mode = None;
        let mut code = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "type" => kind = LinkKind::from_param(&value),
                "mode" => mode = LinkMode::from_param(&value),
                "code" => code = Some(RoomCode::parse(&value)?),
                _ => {}
            }
        }

        let code =
            code.ok_or_else(|| Error::InvalidCodeFormat("link has no code parameter".into()))?;

        Ok(Self {
            origin: url.origin().ascii_serialization(),
            kind: kind.unwrap_or(LinkKind::File),
            mode: mode.unwrap_or(LinkMode::Receive),
            code,
        })
    }

    /// Whether opening this link should join a file room as receiver.
    #[must_use]
    pub fn auto_joins_file_room(&self) -> bool {
        self.mode == LinkMode::Receive && self.kind != LinkKind::Text
    }
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/?type={}&mode={}&code={}",
            self.origin,
            self.kind.as_str(),
            self.mode.as_str(),
            self.code
        )
    }
}

/// Accept either a bare code or a full share link.
///
/// # Errors
///
/// Returns an error if neither form parses.
pub fn code_from_input(input: &str) -> Result<RoomCode> {
    let trimmed = input.trim();
    if trimmed.contains("://") {
        ShareLink::parse(trimmed).map(|link| link.code)
    } else {
        RoomCode::parse(trimmed)
    }
}
