//! UI-facing progress list.
//!
//! Entries are only changed through [`TransferEvent`]s and the request
//! bookkeeping on [`ProgressTracker`]. Status moves forward only:
//! `pending -> downloading/uploading -> completed`. `error` can be reached
//! from any state and is never left.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{Error, Result};

use super::{percent, TransferEvent};

/// Status of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Requested, no metadata yet
    Pending,
    /// Receiving chunks
    Downloading,
    /// Sending chunks
    Uploading,
    /// Finished
    Completed,
    /// Failed locally
    Error,
}

impl ProgressStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading | Self::Uploading => 1,
            Self::Completed => 2,
            Self::Error => 3,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether the transfer is still running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Downloading | Self::Uploading)
    }
}

/// Snapshot of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    /// Transfer id
    pub transfer_id: String,
    /// Offered file id the transfer pulls
    pub file_id: String,
    /// Display name
    pub name: String,
    /// Integer percentage
    pub percent: u8,
    /// Bytes transferred
    pub received: u64,
    /// Declared size (0 until known)
    pub total: u64,
    /// Current status
    pub status: ProgressStatus,
    #[serde(skip)]
    completed_at: Option<Instant>,
}

impl ProgressEntry {
    fn new(transfer_id: &str, file_id: &str, name: &str, status: ProgressStatus) -> Self {
        Self {
            transfer_id: transfer_id.to_string(),
            file_id: file_id.to_string(),
            name: name.to_string(),
            percent: 0,
            received: 0,
            total: 0,
            status,
            completed_at: None,
        }
    }

    fn advance(&mut self, next: ProgressStatus) {
        if self.status == ProgressStatus::Error || next.rank() < self.status.rank() {
            return;
        }
        self.status = next;
        if next == ProgressStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(Instant::now());
        }
    }
}

/// Keeps one [`ProgressEntry`] per transfer.
#[derive(Debug)]
pub struct ProgressTracker {
    entries: Vec<ProgressEntry>,
    linger: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::PROGRESS_LINGER_MS))
    }
}

impl ProgressTracker {
    /// Create a tracker that keeps completed entries for `linger`.
    #[must_use]
    pub const fn new(linger: Duration) -> Self {
        Self {
            entries: Vec::new(),
            linger,
        }
    }

    /// Record a pull request for `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransferInProgress`] if the file already has an
    /// entry that has not completed.
    pub fn begin_request(&mut self, transfer_id: &str, file_id: &str, name: &str) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|e| e.file_id == file_id && e.status != ProgressStatus::Completed)
        {
            tracing::debug!("File {file_id} already has a transfer in progress");
            return Err(Error::TransferInProgress(name.to_string()));
        }

        self.entries.retain(|e| e.file_id != file_id);
        self.entries.push(ProgressEntry::new(
            transfer_id,
            file_id,
            name,
            ProgressStatus::Pending,
        ));
        Ok(())
    }

    /// Fold one transfer event into the list.
    pub fn apply(&mut self, event: &TransferEvent) {
        if let TransferEvent::UploadStarted {
            transfer_id,
            file_id,
            name,
            total,
        } = event
        {
            if self.entry(transfer_id).is_none() {
                let mut entry =
                    ProgressEntry::new(transfer_id, file_id, name, ProgressStatus::Uploading);
                entry.total = *total;
                self.entries.push(entry);
            }
            return;
        }

        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.transfer_id == event.transfer_id())
        else {
            return;
        };

        match event {
            TransferEvent::Started { total, .. } => {
                entry.total = *total;
                entry.advance(ProgressStatus::Downloading);
            }
            TransferEvent::Progress {
                transferred, total, ..
            } => {
                if entry.status == ProgressStatus::Pending {
                    entry.advance(ProgressStatus::Downloading);
                }
                entry.total = *total;
                entry.received = entry.received.max((*transferred).min(*total));
                entry.percent = percent(entry.received, entry.total);
            }
            TransferEvent::Completed { .. } => {
                if entry.status.is_active() {
                    entry.received = entry.total;
                    entry.percent = 100;
                }
                entry.advance(ProgressStatus::Completed);
            }
            TransferEvent::Failed { reason, .. } => {
                tracing::warn!("Transfer {} failed: {reason}", entry.transfer_id);
                entry.advance(ProgressStatus::Error);
            }
            TransferEvent::UploadStarted { .. } => {}
        }
    }

    /// Mark a transfer as failed.
    pub fn mark_error(&mut self, transfer_id: &str, reason: &str) {
        self.apply(&TransferEvent::Failed {
            transfer_id: transfer_id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Remove an entry regardless of its status.
    pub fn dismiss(&mut self, transfer_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.transfer_id != transfer_id);
        self.entries.len() != before
    }

    /// Drop completed entries older than the linger time.
    ///
    /// Returns whether anything was removed.
    pub fn prune(&mut self) -> bool {
        let now = Instant::now();
        let linger = self.linger;
        let before = self.entries.len();
        self.entries.retain(|e| {
            e.completed_at
                .is_none_or(|done| now.duration_since(done) < linger)
        });
        self.entries.len() != before
    }

    /// Look up one entry.
    #[must_use]
    pub fn entry(&self, transfer_id: &str) -> Option<&ProgressEntry> {
        self.entries.iter().find(|e| e.transfer_id == transfer_id)
    }

    /// All entries in request order.
    #[must_use]
    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    /// Copy of the list for rendering.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProgressEntry> {
        self.entries.clone()
    }

    /// Number of transfers still running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_active()).count()
    }

    /// Drop every entry.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str, total: u64) -> TransferEvent {
        TransferEvent::Started {
            transfer_id: id.into(),
            name: "a.bin".into(),
            total,
        }
    }

    fn progress(id: &str, transferred: u64, total: u64) -> TransferEvent {
        TransferEvent::Progress {
            transfer_id: id.into(),
            transferred,
            total,
        }
    }

    fn completed(id: &str) -> TransferEvent {
        TransferEvent::Completed {
            transfer_id: id.into(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut tracker = ProgressTracker::default();
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();
        assert_eq!(tracker.entry("req_1").unwrap().status, ProgressStatus::Pending);

        tracker.apply(&started("req_1", 100));
        assert_eq!(
            tracker.entry("req_1").unwrap().status,
            ProgressStatus::Downloading
        );

        tracker.apply(&progress("req_1", 40, 100));
        let entry = tracker.entry("req_1").unwrap();
        assert_eq!(entry.received, 40);
        assert_eq!(entry.percent, 40);

        tracker.apply(&completed("req_1"));
        let entry = tracker.entry("req_1").unwrap();
        assert_eq!(entry.status, ProgressStatus::Completed);
        assert_eq!(entry.percent, 100);
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let mut tracker = ProgressTracker::default();
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();

        let second = tracker.begin_request("req_2", "file_0", "a.bin");
        assert!(matches!(second, Err(Error::TransferInProgress(_))));
        assert_eq!(tracker.entries().len(), 1);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_request_after_completion_replaces_entry() {
        let mut tracker = ProgressTracker::default();
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();
        tracker.apply(&started("req_1", 1));
        tracker.apply(&completed("req_1"));

        tracker.begin_request("req_2", "file_0", "a.bin").unwrap();
        assert_eq!(tracker.entries().len(), 1);
        assert_eq!(tracker.entries()[0].transfer_id, "req_2");
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let mut tracker = ProgressTracker::default();
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();
        tracker.apply(&started("req_1", 10));
        tracker.apply(&completed("req_1"));
        tracker.apply(&started("req_1", 10));
        assert_eq!(
            tracker.entry("req_1").unwrap().status,
            ProgressStatus::Completed
        );
    }

    #[test]
    fn test_error_is_terminal() {
        let mut tracker = ProgressTracker::default();
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();
        tracker.mark_error("req_1", "channel is not open");
        tracker.apply(&started("req_1", 10));
        tracker.apply(&completed("req_1"));
        assert_eq!(tracker.entry("req_1").unwrap().status, ProgressStatus::Error);

        assert!(tracker.begin_request("req_2", "file_0", "a.bin").is_err());
        assert!(tracker.dismiss("req_1"));
        assert!(tracker.begin_request("req_2", "file_0", "a.bin").is_ok());
    }

    #[test]
    fn test_received_never_decreases() {
        let mut tracker = ProgressTracker::default();
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();
        tracker.apply(&started("req_1", 100));
        tracker.apply(&progress("req_1", 60, 100));
        tracker.apply(&progress("req_1", 30, 100));
        tracker.apply(&progress("req_1", 500, 100));
        let entry = tracker.entry("req_1").unwrap();
        assert_eq!(entry.received, 100);
    }

    #[test]
    fn test_upload_entries() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&TransferEvent::UploadStarted {
            transfer_id: "req_9".into(),
            file_id: "file_0".into(),
            name: "a.bin".into(),
            total: 10,
        });
        tracker.apply(&progress("req_9", 5, 10));
        let entry = tracker.entry("req_9").unwrap();
        assert_eq!(entry.status, ProgressStatus::Uploading);
        assert_eq!(entry.percent, 50);
    }

    #[test]
    fn test_unknown_events_ignored() {
        let mut tracker = ProgressTracker::default();
        tracker.apply(&started("req_x", 10));
        tracker.apply(&completed("req_x"));
        assert!(tracker.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_entries_linger() {
        let mut tracker = ProgressTracker::new(Duration::from_millis(2000));
        tracker.begin_request("req_1", "file_0", "a.bin").unwrap();
        tracker.begin_request("req_2", "file_1", "b.bin").unwrap();
        tracker.apply(&completed("req_1"));
        tracker.mark_error("req_2", "dropped");

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(!tracker.prune());
        assert!(tracker.entry("req_1").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(tracker.prune());
        assert!(tracker.entry("req_1").is_none());
        assert!(tracker.entry("req_2").is_some());
    }
}
