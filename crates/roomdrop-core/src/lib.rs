//! # Roomdrop Core Library
//!
//! `roomdrop-core` provides the client side of Roomdrop, a file and text
//! sharing tool where two people pair through a short room code and move
//! data over a relayed message channel.
//!
//! ## Features
//!
//! - **Room codes**: 6-character codes issued by the room backend
//! - **Chunked transfers**: 64 KiB chunks, reassembled in any arrival order
//! - **Concurrent downloads**: many transfers multiplexed over one channel
//! - **Reconnect**: one automatic reconnect after an abnormal close
//!
//! ## Modules
//!
//! - [`api`] - HTTP client for the room backend
//! - [`channel`] - WebSocket channel to the room hub
//! - [`client`] - Everything wired together
//! - [`code`] - Room codes and shareable links
//! - [`config`] - Configuration management
//! - [`mod@file`] - File descriptors and byte sources
//! - [`protocol`] - Channel message envelopes
//! - [`session`] - Room lifecycle
//! - [`transfer`] - Chunk sender, receiver and progress tracking
//!
//! ## Example
//!
//! ```rust,ignore
//! use roomdrop_core::{client::Client, config::Config, file::offer_paths};
//!
//! // Share files
//! let (client, _outputs) = Client::new(&Config::load()?)?;
//! client.spawn().await?;
//! let room = client.share(offer_paths(&paths)?).await?;
//! println!("Room code: {}", room.code);
//!
//! // On another machine, join with the code
//! let (client, mut outputs) = Client::new(&Config::load()?)?;
//! client.spawn().await?;
//! client.join(&room.code).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod api;
pub mod channel;
pub mod client;
pub mod code;
pub mod config;
pub mod error;
pub mod file;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size for file transfers (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default pause between chunks in milliseconds
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 10;

/// Delay before the reconnect attempt after an abnormal close
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;

/// How long completed progress entries stay visible
pub const PROGRESS_LINGER_MS: u64 = 2000;

/// Maximum characters in a text room
pub const MAX_TEXT_LEN: usize = 50_000;
