//! Events flowing through the scheduler.
//!
//! Transports emit low-level `TransportEvent`s keyed by `TransferId` through
//! an `EventSender`. The scheduler resolves them against the registry and
//! forwards semantic notifications to an `EventSink`.

use std::path::PathBuf;

use tokio::sync::mpsc;
use url::Url;

use crate::batch::BatchReport;
use crate::error::{DownloadError, TransferError};
use crate::transfer::{TaskState, TransferId};

/// Progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Fraction received, in `[0.0, 1.0]`.
    Fraction(f64),
    /// The transport did not report a usable total size.
    Unknown { bytes_written: u64 },
}

impl Progress {
    /// Converts raw byte counts. A missing or zero total yields `Unknown`.
    pub fn from_bytes(bytes_written: u64, bytes_expected: Option<u64>) -> Self {
        match bytes_expected {
            Some(total) if total > 0 => {
                Progress::Fraction((bytes_written as f64 / total as f64).min(1.0))
            }
            _ => Progress::Unknown { bytes_written },
        }
    }

    pub fn fraction(self) -> Option<f64> {
        match self {
            Progress::Fraction(f) => Some(f),
            Progress::Unknown { .. } => None,
        }
    }

    /// Whole percent, if known.
    pub fn percent(self) -> Option<u8> {
        self.fraction().map(|f| (f * 100.0).floor() as u8)
    }

    /// The `TaskState` this progress puts a task in.
    pub fn task_state(self) -> TaskState {
        TaskState::InProgress(self.percent().unwrap_or(0))
    }
}

/// Observer of per-task progress and completion.
///
/// Calls for different tasks may interleave and may arrive from the
/// scheduler loop concurrently with control calls; implementations must be
/// thread-safe. For a single task, `on_completion` is called exactly once and
/// after every `on_progress` for that task.
pub trait EventSink: Send + Sync {
    fn on_progress(&self, source: &Url, name: &str, progress: Progress);

    /// `Ok` carries the final location of the payload.
    fn on_completion(&self, source: &Url, name: &str, outcome: Result<PathBuf, DownloadError>);

    /// Completion tagged with the transfer it ends. The scheduler calls this
    /// one; the default forwards to `on_completion`.
    fn on_transfer_completion(
        &self,
        _id: TransferId,
        source: &Url,
        name: &str,
        outcome: Result<PathBuf, DownloadError>,
    ) {
        self.on_completion(source, name, outcome);
    }

    /// Called once when every task of a batch has reached its terminal event.
    fn on_batch_complete(&self, _report: &BatchReport) {}
}

/// Owned form of an `EventSink` notification.
#[derive(Debug)]
pub enum DownloadEvent {
    Progress {
        source: Url,
        name: String,
        progress: Progress,
    },
    Completed {
        source: Url,
        name: String,
        outcome: Result<PathBuf, DownloadError>,
    },
    BatchComplete(BatchReport),
}

/// Sink that forwards every notification into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_progress(&self, source: &Url, name: &str, progress: Progress) {
        let _ = self.tx.send(DownloadEvent::Progress {
            source: source.clone(),
            name: name.to_string(),
            progress,
        });
    }

    fn on_completion(&self, source: &Url, name: &str, outcome: Result<PathBuf, DownloadError>) {
        let _ = self.tx.send(DownloadEvent::Completed {
            source: source.clone(),
            name: name.to_string(),
            outcome,
        });
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        let _ = self.tx.send(DownloadEvent::BatchComplete(report.clone()));
    }
}

/// Raw event emitted by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    Progress {
        id: TransferId,
        bytes_written: u64,
        bytes_expected: Option<u64>,
    },
    /// Payload fully received and staged at `staged`.
    Finished { id: TransferId, staged: PathBuf },
    Failed { id: TransferId, error: TransferError },
}

impl TransportEvent {
    pub fn id(&self) -> TransferId {
        match self {
            TransportEvent::Progress { id, .. }
            | TransportEvent::Finished { id, .. }
            | TransportEvent::Failed { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Progress { .. })
    }
}

/// Sending side handed to a transport for one transfer.
///
/// Sends after the scheduler has shut down are dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    id: TransferId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSender {
    pub fn new(id: TransferId, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn progress(&self, bytes_written: u64, bytes_expected: Option<u64>) {
        let _ = self.tx.send(TransportEvent::Progress {
            id: self.id,
            bytes_written,
            bytes_expected,
        });
    }

    pub fn finished(&self, staged: PathBuf) {
        let _ = self.tx.send(TransportEvent::Finished { id: self.id, staged });
    }

    pub fn failed(&self, error: TransferError) {
        let _ = self.tx.send(TransportEvent::Failed { id: self.id, error });
    }
}
