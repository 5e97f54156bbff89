//! Error types surfaced through completion notifications.
//!
//! A completion carries either the final location or a `DownloadError`.
//! `Transport` and `Move` stay separate variants so callers can tell a
//! network failure from a disk failure without parsing messages.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a transport for one transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// libcurl reported an error (DNS, connect, timeout, reset, ...).
    #[error("curl: {0}")]
    Curl(#[from] curl::Error),
    /// Response status was not 2xx.
    #[error("HTTP {0}")]
    Http(u32),
    /// The staging file could not be created or written.
    #[error("staging: {0}")]
    Staging(#[source] io::Error),
    /// The transfer ran longer than its overall cap, not counting time suspended.
    #[error("transfer timed out after {}s of active time", .0.as_secs())]
    TimedOut(Duration),
    /// The transfer was cancelled before it finished.
    #[error("transfer cancelled")]
    Cancelled,
    /// The transport refused to create the transfer.
    #[error("submit failed: {0}")]
    Submit(String),
}

/// Reason a destination path could not be derived from a task name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("name {0:?} is empty after sanitizing")]
    EmptyName(String),
}

/// Terminal error for a task, as delivered to the event sink.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The network transfer itself failed.
    #[error("download failed: {0}")]
    Transport(#[from] TransferError),
    /// The payload arrived but no destination could be derived for it.
    #[error("invalid destination: {0}")]
    Destination(#[from] DestinationError),
    /// The payload arrived but moving it into place failed.
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DownloadError {
    /// True if the failure happened after the bytes were received.
    pub fn is_disk_error(&self) -> bool {
        matches!(self, DownloadError::Move { .. } | DownloadError::Destination(_))
    }

    /// True if the task ended because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Transport(TransferError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_error_names_both_paths() {
        let err = DownloadError::Move {
            from: PathBuf::from("/tmp/stage.part"),
            to: PathBuf::from("/data/item_1"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/stage.part"));
        assert!(msg.contains("/data/item_1"));
        assert!(err.is_disk_error());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn transport_errors_are_not_disk_errors() {
        let err = DownloadError::from(TransferError::Http(404));
        assert_eq!(err.to_string(), "download failed: HTTP 404");
        assert!(!err.is_disk_error());
        assert!(DownloadError::from(TransferError::Cancelled).is_cancelled());
    }
}
