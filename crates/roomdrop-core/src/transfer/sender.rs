//! Sender-side chunk streaming.
//!
//! Every `file-request` is answered by its own task. The task reads the
//! file in fixed windows through a small bounded queue and writes chunks
//! with [`Channel::send`], so a slow connection slows the reader
//! down instead of piling frames up in memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::file::{FileDescriptor, OfferedFile};
use crate::protocol::{FileChunk, FileComplete, FileInfo, FileRequest, Message};

use super::TransferEvent;

/// Chunk streaming settings.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Bytes per chunk
    pub chunk_size: usize,
    /// Pause after each chunk (zero disables pacing)
    pub chunk_delay: Duration,
    /// Chunks read ahead of the channel
    pub read_ahead: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(crate::DEFAULT_CHUNK_DELAY_MS),
            read_ahead: 4,
        }
    }
}

/// Answers file requests for the set of files this side offers.
#[derive(Debug, Clone)]
pub struct ChunkedSender {
    channel: Channel,
    files: Arc<RwLock<Vec<OfferedFile>>>,
    config: SenderConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl ChunkedSender {
    /// Create a sender writing to `channel` and reporting on `events`.
    #[must_use]
    pub fn new(
        channel: Channel,
        config: SenderConfig,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            channel,
            files: Arc::new(RwLock::new(Vec::new())),
            config,
            events,
        }
    }

    /// Replace the offered file set.
    pub async fn set_files(&self, files: Vec<OfferedFile>) {
        *self.files.write().await = files;
    }

    /// Descriptors of the offered files.
    pub async fn descriptors(&self) -> Vec<FileDescriptor> {
        self.files
            .read()
            .await
            .iter()
            .map(|f| f.descriptor.clone())
            .collect()
    }

    /// Start streaming the requested file.
    ///
    /// Requests for files that are not offered are ignored and `None` is
    /// returned.
    pub async fn handle_request(&self, request: &FileRequest) -> Option<JoinHandle<Result<u64>>> {
        let file = self
            .files
            .read()
            .await
            .iter()
            .find(|f| f.descriptor.id == request.file_id)
            .cloned();

        let Some(file) = file else {
            tracing::debug!("Ignoring request for unknown file {}", request.file_id);
            return None;
        };

        tracing::info!(
            "Sending '{}' for request {}",
            file.descriptor.name,
            request.request_id
        );

        let task = StreamTask {
            channel: self.channel.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            transfer_id: request.request_id.clone(),
        };
        Some(tokio::spawn(task.run(file)))
    }
}

struct StreamTask {
    channel: Channel,
    config: SenderConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
    transfer_id: String,
}

impl StreamTask {
    async fn run(self, file: OfferedFile) -> Result<u64> {
        let result = self.stream(&file).await;
        if let Err(e) = &result {
            tracing::warn!("Sending '{}' failed: {e}", file.descriptor.name);
            self.emit(TransferEvent::Failed {
                transfer_id: self.transfer_id.clone(),
                reason: e.to_string(),
            });
        }
        result
    }

    async fn stream(&self, file: &OfferedFile) -> Result<u64> {
        let descriptor = &file.descriptor;
        let total = descriptor.size;
        let reader = file.source.open().await?;

        let info = Message::FileInfo(FileInfo {
            file_id: self.transfer_id.clone(),
            name: descriptor.name.clone(),
            size: total,
            mime_type: descriptor.mime_type.clone(),
            last_modified: descriptor.last_modified,
        });
        if !self.channel.send(&info).await {
            return Err(Error::ChannelNotOpen);
        }

        self.emit(TransferEvent::UploadStarted {
            transfer_id: self.transfer_id.clone(),
            file_id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            total,
        });

        let (tx, mut rx) = mpsc::channel(self.config.read_ahead.max(1));
        let producer = tokio::spawn(read_windows(reader, self.config.chunk_size.max(1), tx));

        let mut offset = 0u64;
        while let Some(window) = rx.recv().await {
            let data = window?;
            let len = data.len() as u64;
            let chunk = Message::FileChunk(FileChunk {
                file_id: self.transfer_id.clone(),
                offset,
                data,
                is_last: offset + len >= total,
            });

            if !self.channel.send(&chunk).await {
                producer.abort();
                return Err(Error::ChannelClosed(format!(
                    "connection lost at offset {offset}"
                )));
            }

            offset += len;
            self.emit(TransferEvent::Progress {
                transfer_id: self.transfer_id.clone(),
                transferred: offset,
                total,
            });

            if !self.config.chunk_delay.is_zero() {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
        }

        let complete = Message::FileComplete(FileComplete {
            file_id: self.transfer_id.clone(),
        });
        if !self.channel.send(&complete).await {
            return Err(Error::ChannelNotOpen);
        }

        if offset != total {
            tracing::warn!(
                "Sent {offset} bytes of '{}' but {total} were advertised",
                descriptor.name
            );
        }

        self.emit(TransferEvent::Completed {
            transfer_id: self.transfer_id.clone(),
        });
        tracing::info!("Sent '{}' ({offset} bytes)", descriptor.name);
        Ok(offset)
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }
}

/// Read `reader` in windows of `chunk_size` bytes until end of input.
///
/// Stops early when the consumer goes away.
async fn read_windows(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    chunk_size: usize,
    tx: mpsc::Sender<std::io::Result<Vec<u8>>>,
) {
    loop {
        let mut window = Vec::with_capacity(chunk_size);
        let read = (&mut reader)
            .take(chunk_size as u64)
            .read_to_end(&mut window)
            .await;

        match read {
            Ok(0) => return,
            Ok(n) => {
                if tx.send(Ok(window)).await.is_err() || n < chunk_size {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;

    #[tokio::test]
    async fn test_read_windows_splits_exactly() {
        let data: Vec<u8> = (0..10u8).collect();
        let (tx, mut rx) = mpsc::channel(2);
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(std::io::Cursor::new(data));
        tokio::spawn(read_windows(reader, 4, tx));

        let mut windows = Vec::new();
        while let Some(window) = rx.recv().await {
            windows.push(window.unwrap());
        }
        assert_eq!(windows, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    }

    #[tokio::test]
    async fn test_read_windows_exact_multiple() {
        let (tx, mut rx) = mpsc::channel(2);
        let reader: Box<dyn AsyncRead + Send + Unpin> =
            Box::new(std::io::Cursor::new(vec![7u8; 8]));
        tokio::spawn(read_windows(reader, 4, tx));

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_unknown_file_ignored() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let sender = ChunkedSender::new(
            Channel::new(ChannelConfig::default()),
            SenderConfig::default(),
            events_tx,
        );
        sender
            .set_files(vec![OfferedFile::from_bytes(0, "a.bin", "", vec![1, 2, 3])])
            .await;

        let handle = sender
            .handle_request(&FileRequest {
                file_id: "file_7".into(),
                request_id: "req_1".into(),
            })
            .await;
        assert!(handle.is_none());
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_fails_transfer() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let sender = ChunkedSender::new(
            Channel::new(ChannelConfig::default()),
            SenderConfig::default(),
            events_tx,
        );
        sender
            .set_files(vec![OfferedFile::from_bytes(0, "a.bin", "", vec![1, 2, 3])])
            .await;

        let handle = sender
            .handle_request(&FileRequest {
                file_id: "file_0".into(),
                request_id: "req_1".into(),
            })
            .await
            .unwrap();

        assert!(matches!(handle.await.unwrap(), Err(Error::ChannelNotOpen)));
        assert!(matches!(
            events_rx.recv().await,
            Some(TransferEvent::Failed { .. })
        ));
    }
}
