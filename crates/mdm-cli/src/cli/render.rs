//! Terminal rendering of batch events: human status lines or JSON lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mdm_core::{BatchReport, DownloadError, EventSink, Progress, TaskState};
use serde::Serialize;
use url::Url;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Line<'a> {
    Pending {
        name: &'a str,
        source: &'a str,
    },
    Progress {
        name: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes: Option<u64>,
    },
    Completed {
        name: &'a str,
        path: &'a Path,
    },
    Failed {
        name: &'a str,
        error: String,
        disk: bool,
    },
    BatchComplete(&'a BatchReport),
}

impl Line<'_> {
    fn human(&self) -> String {
        match self {
            Line::Pending { name, source } => format!("{name}: {} ({source})", TaskState::Pending),
            Line::Progress {
                name,
                percent: Some(p),
                ..
            } => format!("{name}: {}", TaskState::InProgress(*p)),
            Line::Progress { name, bytes, .. } => format!(
                "{name}: {} ({} bytes, size unknown)",
                TaskState::InProgress(0).label(),
                bytes.unwrap_or(0)
            ),
            Line::Completed { name, path } => {
                format!("{name}: {} -> {}", TaskState::Completed, path.display())
            }
            Line::Failed { name, error, .. } => format!("{name}: Failed: {error}"),
            Line::BatchComplete(r) => format!(
                "All downloads finished: {} succeeded, {} failed ({} total)",
                r.succeeded, r.failed, r.total
            ),
        }
    }
}

/// Bytes a task of unknown size must gain before its progress is printed again.
const UNKNOWN_SIZE_STEP: u64 = 1024 * 1024;

/// What was last printed for a task.
#[derive(Debug, Default)]
struct Shown {
    state: TaskState,
    bytes: u64,
}

/// Prints events to stdout. Progress is printed only when a task's
/// displayed state changes, or every `UNKNOWN_SIZE_STEP` bytes when its
/// size is unknown.
pub struct Renderer {
    json: bool,
    shown: Mutex<HashMap<String, Shown>>,
}

impl Renderer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            shown: Mutex::new(HashMap::new()),
        }
    }

    pub fn emit(&self, line: &Line<'_>) {
        if self.json {
            match serde_json::to_string(line) {
                Ok(s) => println!("{s}"),
                Err(e) => tracing::warn!("render event as JSON: {}", e),
            }
        } else {
            println!("{}", line.human());
        }
    }

    fn with_shown<T>(&self, name: &str, f: impl FnOnce(&mut Shown) -> T) -> T {
        let mut shown = self
            .shown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(shown.entry(name.to_string()).or_default())
    }

    /// Records `next` for `name`; returns true if the visible state changed.
    fn advance(&self, name: &str, next: TaskState) -> bool {
        self.with_shown(name, |shown| {
            let advanced = shown.state.advance(next);
            let changed = advanced != shown.state;
            shown.state = advanced;
            changed
        })
    }

    /// Records a byte count for a task of unknown size; returns true on the
    /// first report and whenever `UNKNOWN_SIZE_STEP` more bytes arrived.
    fn advance_bytes(&self, name: &str, bytes: u64) -> bool {
        self.with_shown(name, |shown| {
            if shown.state == TaskState::Completed {
                return false;
            }
            let first = shown.state == TaskState::Pending;
            shown.state = shown.state.advance(TaskState::InProgress(0));
            if first || bytes >= shown.bytes.saturating_add(UNKNOWN_SIZE_STEP) {
                shown.bytes = bytes;
                return true;
            }
            false
        })
    }
}

impl EventSink for Renderer {
    fn on_progress(&self, _source: &Url, name: &str, progress: Progress) {
        let (changed, bytes) = match progress {
            Progress::Unknown { bytes_written } => {
                (self.advance_bytes(name, bytes_written), Some(bytes_written))
            }
            Progress::Fraction(_) => (self.advance(name, progress.task_state()), None),
        };
        if !changed {
            return;
        }
        self.emit(&Line::Progress {
            name,
            percent: progress.percent(),
            bytes,
        });
    }

    fn on_completion(&self, _source: &Url, name: &str, outcome: Result<PathBuf, DownloadError>) {
        match outcome {
            Ok(path) => {
                self.advance(name, TaskState::Completed);
                self.emit(&Line::Completed { name, path: &path });
            }
            Err(e) => self.emit(&Line::Failed {
                name,
                error: e.to_string(),
                disk: e.is_disk_error(),
            }),
        }
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        self.emit(&Line::BatchComplete(report));
    }
}
