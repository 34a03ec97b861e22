//! Receiver-side chunk reassembly.
//!
//! [`ChunkedReceiver`] keeps one transfer record per transfer id. A record
//! is inserted on `file-info`, collects chunks in whatever order they
//! arrive, and is removed when `file-complete` assembles the payload or the
//! receiver is reset.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::file::unique_output_path;
use crate::protocol::{FileChunk, FileInfo};

use super::{percent, TransferEvent};

/// Reassembly state for one transfer.
#[derive(Debug)]
struct TransferRecord {
    name: String,
    mime_type: String,
    total: u64,
    received: u64,
    chunks: Vec<(u64, Vec<u8>)>,
    offsets: HashSet<u64>,
    started: Instant,
}

impl TransferRecord {
    fn new(info: &FileInfo) -> Self {
        Self {
            name: info.name.clone(),
            mime_type: info.mime_type.clone(),
            total: info.size,
            received: 0,
            chunks: Vec::new(),
            offsets: HashSet::new(),
            started: Instant::now(),
        }
    }

    fn chunks_complete(&self) -> bool {
        self.received >= self.total
    }
}

/// What accepting one chunk changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Transfer id
    pub transfer_id: String,
    /// Bytes counted so far, never above `total`
    pub received: u64,
    /// Declared size
    pub total: u64,
    /// Integer percentage
    pub percent: u8,
    /// All bytes are in, or the sender flagged the last chunk
    pub chunks_complete: bool,
}

impl ChunkOutcome {
    /// Progress event for this outcome.
    #[must_use]
    pub fn event(&self) -> TransferEvent {
        TransferEvent::Progress {
            transfer_id: self.transfer_id.clone(),
            transferred: self.received,
            total: self.total,
        }
    }
}

/// A fully assembled payload.
#[derive(Debug, Clone)]
pub struct CompletedPayload {
    /// Transfer id
    pub transfer_id: String,
    /// Name announced by the sender
    pub name: String,
    /// MIME type announced by the sender
    pub mime_type: String,
    /// Payload bytes in offset order
    pub data: Vec<u8>,
    /// Time from `file-info` to assembly
    pub elapsed: Duration,
    /// Average rate in bytes per second
    pub rate_bps: u64,
}

impl CompletedPayload {
    /// Write the payload into `dir` without overwriting existing files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = unique_output_path(dir, &self.name);
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// Accumulates chunks for concurrent transfers keyed by transfer id.
#[derive(Debug, Default)]
pub struct ChunkedReceiver {
    records: HashMap<String, TransferRecord>,
    finalized: HashSet<String>,
}

impl ChunkedReceiver {
    /// Create an empty receiver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the transfer described by `info`.
    pub fn begin_transfer(&mut self, info: &FileInfo) -> TransferEvent {
        if self
            .records
            .insert(info.file_id.clone(), TransferRecord::new(info))
            .is_some()
        {
            tracing::debug!("Restarting transfer {}", info.file_id);
        }

        TransferEvent::Started {
            transfer_id: info.file_id.clone(),
            name: info.name.clone(),
            total: info.size,
        }
    }

    /// Accept one chunk.
    ///
    /// Returns `None` when the chunk is dropped: unknown transfer id, a
    /// record that already holds every byte, or an offset seen before.
    pub fn receive_chunk(&mut self, chunk: FileChunk) -> Option<ChunkOutcome> {
        let Some(record) = self.records.get_mut(&chunk.file_id) else {
            tracing::debug!("Dropping chunk for unknown transfer {}", chunk.file_id);
            return None;
        };

        if record.chunks_complete() && record.total > 0 {
            tracing::debug!(
                "Transfer {} already has all bytes, dropping chunk at {}",
                chunk.file_id,
                chunk.offset
            );
            return None;
        }

        if !record.offsets.insert(chunk.offset) {
            tracing::debug!(
                "Dropping repeated chunk at {} for transfer {}",
                chunk.offset,
                chunk.file_id
            );
            return None;
        }

        let len = chunk.data.len() as u64;
        record.received = record.received.saturating_add(len).min(record.total);
        record.chunks.push((chunk.offset, chunk.data));

        let chunks_complete = chunk.is_last || record.chunks_complete();
        if chunks_complete {
            tracing::debug!("All chunks in for transfer {}", chunk.file_id);
        }

        Some(ChunkOutcome {
            received: record.received,
            total: record.total,
            percent: percent(record.received, record.total),
            chunks_complete,
            transfer_id: chunk.file_id,
        })
    }

    /// Assemble and release the transfer `id`.
    ///
    /// Returns the payload the first time it is called for an id and
    /// `None` on every later call.
    pub fn complete_transfer(&mut self, id: &str) -> Option<CompletedPayload> {
        if self.finalized.contains(id) {
            tracing::debug!("Transfer {id} already finalized, ignoring completion");
            return None;
        }

        let Some(mut record) = self.records.remove(id) else {
            tracing::warn!("Completion for unknown transfer {id}");
            return None;
        };
        self.finalized.insert(id.to_string());

        record.chunks.sort_by_key(|(offset, _)| *offset);
        let assembled_len: usize = record.chunks.iter().map(|(_, bytes)| bytes.len()).sum();
        let mut data = Vec::with_capacity(assembled_len);
        for (_, bytes) in record.chunks {
            data.extend_from_slice(&bytes);
        }

        if data.len() as u64 != record.total {
            tracing::warn!(
                "Transfer {id} assembled {} bytes but {} were declared",
                data.len(),
                record.total
            );
        }

        let elapsed = record.started.elapsed();
        let rate_bps = (data.len() as f64 / elapsed.as_secs_f64().max(0.001)) as u64;

        tracing::info!(
            "Received '{}' ({} bytes) in {:.2}s",
            record.name,
            data.len(),
            elapsed.as_secs_f64()
        );

        Some(CompletedPayload {
            transfer_id: id.to_string(),
            name: record.name,
            mime_type: record.mime_type,
            data,
            elapsed,
            rate_bps,
        })
    }

    /// Whether a record exists for `id`.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of transfers being reassembled.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records.len()
    }

    /// Drop the partial record for `id`.
    ///
    /// The id is not finalized, so a restarted transfer under the same id
    /// can still complete. Returns whether a record was dropped.
    pub fn abandon(&mut self, id: &str) -> bool {
        let dropped = self.records.remove(id).is_some();
        if dropped {
            tracing::debug!("Abandoned transfer {id}");
        }
        dropped
    }

    /// Drop every record and forget finalized ids.
    pub fn reset(&mut self) {
        self.records.clear();
        self.finalized.clear();
    }
}
