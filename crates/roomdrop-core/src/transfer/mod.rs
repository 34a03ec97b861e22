//! Chunked file transfer over the room channel.
//!
//! This module handles moving file payloads between room peers:
//!
//! - Streaming offered files as ordered chunk messages ([`ChunkedSender`])
//! - Reassembling chunks for many concurrent transfers ([`ChunkedReceiver`])
//! - Keeping a UI-facing list of transfer states ([`ProgressTracker`])
//!
//! ## Transfer Protocol
//!
//! A receiver pulls a file by sending `file-request` with a fresh transfer
//! id. The sender answers on that id with one `file-info`, a run of
//! `file-chunk` messages in increasing offset order, and a final
//! `file-complete`. Chunks are 64 KiB by default. The `is_last` flag on a
//! chunk is a hint; `file-complete` is what finalizes a transfer.

pub mod progress;
pub mod receiver;
pub mod sender;

pub use progress::{ProgressEntry, ProgressStatus, ProgressTracker};
pub use receiver::{ChunkOutcome, ChunkedReceiver, CompletedPayload};
pub use sender::{ChunkedSender, SenderConfig};

use rand::Rng;

/// Prefix of receiver-minted transfer ids.
pub const TRANSFER_ID_PREFIX: &str = "req_";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Mint a transfer id: `req_<unix millis>_<9 random base36 chars>`.
#[must_use]
pub fn new_transfer_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect();
    format!("{TRANSFER_ID_PREFIX}{millis}_{suffix}")
}

/// Something that happened to one transfer.
///
/// Produced by the sender and receiver, consumed by [`ProgressTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Metadata for a requested download arrived
    Started {
        /// Transfer id
        transfer_id: String,
        /// Display name
        name: String,
        /// Declared size in bytes
        total: u64,
    },
    /// This side began streaming a file to a peer
    UploadStarted {
        /// Transfer id chosen by the peer
        transfer_id: String,
        /// Offered file id
        file_id: String,
        /// Display name
        name: String,
        /// Size in bytes
        total: u64,
    },
    /// Bytes moved
    Progress {
        /// Transfer id
        transfer_id: String,
        /// Bytes transferred so far
        transferred: u64,
        /// Declared size in bytes
        total: u64,
    },
    /// The transfer finished
    Completed {
        /// Transfer id
        transfer_id: String,
    },
    /// The transfer failed locally
    Failed {
        /// Transfer id
        transfer_id: String,
        /// What went wrong
        reason: String,
    },
}

impl TransferEvent {
    /// Transfer id the event is about.
    #[must_use]
    pub fn transfer_id(&self) -> &str {
        match self {
            Self::Started { transfer_id, .. }
            | Self::UploadStarted { transfer_id, .. }
            | Self::Progress { transfer_id, .. }
            | Self::Completed { transfer_id }
            | Self::Failed { transfer_id, .. } => transfer_id,
        }
    }
}

/// Integer percentage of `done` out of `total`, 100 for empty payloads.
#[must_use]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = done.min(total).saturating_mul(100) / total;
    u8::try_from(pct).unwrap_or(100)
}
