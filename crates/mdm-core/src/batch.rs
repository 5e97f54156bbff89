//! Batch runs: issue a fixed set of downloads and signal once all are terminal.
//!
//! Each batch owns its counter. `outstanding` starts at one for the launch
//! itself, gains one per request before that request is started, and loses
//! one per terminal event of a member transfer; the launch guard is dropped
//! after the last request is issued. Zero is therefore reached exactly once,
//! after every task has finished, no matter how fast the first tasks complete.
//! Transfers started on the scheduler outside the batch are not members and
//! never move the count.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

use crate::error::DownloadError;
use crate::event::{EventSink, Progress};
use crate::scheduler::{DownloadScheduler, SchedulerSettings};
use crate::transfer::TransferId;
use crate::transport::Transport;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("a batch is already running ({outstanding} task(s) outstanding)")]
    AlreadyRunning { outstanding: usize },
    #[error("batch coordinator was dropped before the batch completed")]
    Abandoned,
    #[error("invalid download request {input:?}: {reason}")]
    InvalidRequest { input: String, reason: String },
}

/// One download to issue: where to fetch from and the task name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source: Url,
    pub name: String,
}

impl DownloadRequest {
    pub fn new(source: Url, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    /// Parses `URL` or `NAME=URL`. Without a name, the last path segment of
    /// the URL is used, or `item_<index + 1>` when the path has none.
    pub fn parse(input: &str, index: usize) -> Result<Self, BatchError> {
        let input = input.trim();
        match input.split_once('=') {
            Some((name, url)) if !name.is_empty() && !name.contains([':', '/', '?']) => {
                Self::from_parts(url.trim(), Some(name.trim()), index)
            }
            _ => Self::from_parts(input, None, index),
        }
    }

    /// Builds a request from a URL string and an optional name, with the
    /// same default naming as `parse`.
    pub fn from_parts(url: &str, name: Option<&str>, index: usize) -> Result<Self, BatchError> {
        let source = Url::parse(url).map_err(|e| BatchError::InvalidRequest {
            input: url.to_string(),
            reason: e.to_string(),
        })?;
        let name = match name.filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => default_name(&source, index),
        };
        Ok(Self { source, name })
    }
}

fn default_name(source: &Url, index: usize) -> String {
    source
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("item_{}", index + 1))
}

/// Summary delivered when a batch completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outstanding-count for one batch.
#[derive(Debug)]
struct BatchCounter {
    id: u64,
    total: usize,
    outstanding: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    /// Member transfers not yet terminal.
    members: Mutex<HashSet<TransferId>>,
    done: Mutex<Option<oneshot::Sender<BatchReport>>>,
}

impl BatchCounter {
    fn new(id: u64, total: usize, done: oneshot::Sender<BatchReport>) -> Self {
        Self {
            id,
            total,
            // The launch guard.
            outstanding: AtomicUsize::new(1),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            members: Mutex::new(HashSet::new()),
            done: Mutex::new(Some(done)),
        }
    }

    fn enter(&self, id: TransferId) {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Takes `id` out of the member set; true if it was a member.
    fn claim(&self, id: TransferId) -> bool {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Decrements `outstanding`; returns true for the call that reached zero.
    /// `outstanding` never goes below zero.
    fn leave(&self) -> bool {
        match self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev == 1,
            Err(_) => {
                tracing::warn!(batch = self.id, "terminal event after batch completed ignored");
                false
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn report(&self) -> BatchReport {
        BatchReport {
            batch: self.id,
            total: self.total,
            succeeded: self.succeeded.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

/// State shared between the coordinator and the sink wrapper it installs
/// in its scheduler.
struct BatchState {
    inner: Arc<dyn EventSink>,
    current: Mutex<Option<Arc<BatchCounter>>>,
}

impl BatchState {
    fn current(&self) -> MutexGuard<'_, Option<Arc<BatchCounter>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn leave(&self, counter: &Arc<BatchCounter>) {
        if !counter.leave() {
            return;
        }
        let report = counter.report();
        {
            let mut current = self.current();
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, counter)) {
                *current = None;
            }
        }
        tracing::info!(
            batch = report.batch,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch complete"
        );
        self.inner.on_batch_complete(&report);
        let done = counter.done.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(done) = done {
            let _ = done.send(report);
        }
    }
}

impl EventSink for BatchState {
    fn on_progress(&self, source: &Url, name: &str, progress: Progress) {
        self.inner.on_progress(source, name, progress);
    }

    fn on_completion(&self, source: &Url, name: &str, outcome: Result<PathBuf, DownloadError>) {
        self.inner.on_completion(source, name, outcome);
    }

    fn on_transfer_completion(
        &self,
        id: TransferId,
        source: &Url,
        name: &str,
        outcome: Result<PathBuf, DownloadError>,
    ) {
        let ok = outcome.is_ok();
        self.inner.on_transfer_completion(id, source, name, outcome);
        let counter = self.current().clone();
        if let Some(counter) = counter.filter(|c| c.claim(id)) {
            if ok {
                counter.succeeded.fetch_add(1, Ordering::AcqRel);
            } else {
                counter.failed.fetch_add(1, Ordering::AcqRel);
            }
            self.leave(&counter);
        }
    }
}

/// Resolves when its batch completes.
#[derive(Debug)]
pub struct BatchHandle {
    id: u64,
    done: oneshot::Receiver<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<BatchReport, BatchError> {
        self.done.await.map_err(|_| BatchError::Abandoned)
    }
}

/// Drives one batch at a time through its own scheduler.
pub struct BatchCoordinator {
    scheduler: Arc<DownloadScheduler>,
    state: Arc<BatchState>,
    next_batch: AtomicU64,
}

impl BatchCoordinator {
    /// Must be called inside a tokio runtime (spawns the scheduler loop).
    pub fn new(
        settings: SchedulerSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let state = Arc::new(BatchState {
            inner: sink,
            current: Mutex::new(None),
        });
        let scheduler = DownloadScheduler::spawn(
            settings,
            transport,
            Arc::clone(&state) as Arc<dyn EventSink>,
        );
        Self {
            scheduler,
            state,
            next_batch: AtomicU64::new(1),
        }
    }

    pub fn scheduler(&self) -> &DownloadScheduler {
        &self.scheduler
    }

    /// Starts every request. Rejected while a previous batch is still outstanding.
    pub fn run_batch(&self, requests: Vec<DownloadRequest>) -> Result<BatchHandle, BatchError> {
        let id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let counter = Arc::new(BatchCounter::new(id, requests.len(), done_tx));
        {
            let mut current = self.state.current();
            if let Some(running) = current.as_ref() {
                return Err(BatchError::AlreadyRunning {
                    outstanding: running.outstanding(),
                });
            }
            *current = Some(Arc::clone(&counter));
        }

        tracing::info!(
            batch = id,
            tasks = requests.len(),
            max_parallel = self.scheduler.max_parallel(),
            "batch started"
        );
        for request in requests {
            let transfer = self.scheduler.mint_id();
            counter.enter(transfer);
            self.scheduler.start_as(transfer, request.source, &request.name);
        }
        self.state.leave(&counter);

        Ok(BatchHandle { id, done: done_rx })
    }

    /// Tasks of the current batch not yet terminal (0 when idle).
    pub fn outstanding(&self) -> usize {
        self.state.current().as_ref().map_or(0, |c| c.outstanding())
    }

    pub fn is_running(&self) -> bool {
        self.state.current().is_some()
    }

    pub fn pause(&self, name: &str) -> bool {
        self.scheduler.pause(name)
    }

    pub fn resume(&self, name: &str) -> bool {
        self.scheduler.resume(name)
    }

    pub fn cancel(&self, name: &str) -> bool {
        self.scheduler.cancel(name)
    }
}
