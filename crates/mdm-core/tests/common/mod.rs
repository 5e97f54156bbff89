//! Shared fixtures: a transport driven by the test, and helpers to await events.

#![allow(dead_code)]

pub mod http_server;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mdm_core::destination::Destination;
use mdm_core::transport::{TransferControl, Transport};
use mdm_core::{
    DownloadError, DownloadEvent, EventSender, Progress, SchedulerSettings, TransferError,
    TransferId,
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

pub fn settings(root: &Path, max_parallel: usize) -> SchedulerSettings {
    SchedulerSettings {
        max_parallel,
        destination: Destination::new(root.join("out"), false),
        staging_dir: root.join("staging"),
    }
}

pub fn url(name: &str) -> Url {
    Url::parse(&format!("https://example.com/{name}.zip")).unwrap()
}

/// One transfer created by `ManualTransport`. The test emits its events.
pub struct ManualTransfer {
    pub id: TransferId,
    pub source: Url,
    events: EventSender,
    staging_dir: PathBuf,
    started: AtomicBool,
    suspended: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl ManualTransfer {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Control calls received, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn progress(&self, written: u64, expected: Option<u64>) {
        self.events.progress(written, expected);
    }

    /// Stages `body` and reports success.
    pub fn succeed(&self, body: &[u8]) -> PathBuf {
        std::fs::create_dir_all(&self.staging_dir).unwrap();
        let staged = self.staging_dir.join(format!("manual-{}.part", self.id.get()));
        std::fs::write(&staged, body).unwrap();
        self.events.finished(staged.clone());
        staged
    }

    pub fn fail(&self, error: TransferError) {
        self.events.failed(error);
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

struct ManualControl(Arc<ManualTransfer>);

impl TransferControl for ManualControl {
    fn start(&self) {
        self.0.record("start");
        self.0.started.store(true, Ordering::Release);
    }

    fn suspend(&self) {
        self.0.record("suspend");
        self.0.suspended.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.0.record("resume");
        self.0.suspended.store(false, Ordering::Release);
    }

    fn cancel(&self) {
        self.0.record("cancel");
        if self.0.is_started() {
            self.0.events.failed(TransferError::Cancelled);
        }
    }
}

/// Transport whose transfers only move when the test tells them to.
pub struct ManualTransport {
    staging_dir: PathBuf,
    transfers: Mutex<Vec<Arc<ManualTransfer>>>,
    refuse: AtomicBool,
}

impl ManualTransport {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            staging_dir: staging_dir.into(),
            transfers: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        })
    }

    /// Makes every following `submit` fail.
    pub fn refuse_submissions(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    /// All transfers submitted so far, in submission order.
    pub fn transfers(&self) -> Vec<Arc<ManualTransfer>> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn transfer(&self, index: usize) -> Arc<ManualTransfer> {
        Arc::clone(&self.transfers.lock().unwrap()[index])
    }

    pub fn started_count(&self) -> usize {
        self.transfers().iter().filter(|t| t.is_started()).count()
    }
}

impl Transport for ManualTransport {
    fn submit(
        &self,
        id: TransferId,
        source: &Url,
        events: EventSender,
    ) -> Result<Box<dyn TransferControl>, TransferError> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(TransferError::Submit("refused by test".into()));
        }
        let transfer = Arc::new(ManualTransfer {
            id,
            source: source.clone(),
            events,
            staging_dir: self.staging_dir.clone(),
            started: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        });
        self.transfers.lock().unwrap().push(Arc::clone(&transfer));
        Ok(Box::new(ManualControl(transfer)))
    }
}

/// Polls `cond` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skips progress events and returns the next completion.
pub async fn next_completion(
    rx: &mut UnboundedReceiver<DownloadEvent>,
) -> (String, Result<PathBuf, DownloadError>) {
    loop {
        match next_event(rx).await {
            DownloadEvent::Completed { name, outcome, .. } => return (name, outcome),
            DownloadEvent::Progress { .. } => continue,
            DownloadEvent::BatchComplete(report) => {
                panic!("unexpected batch completion {report:?}")
            }
        }
    }
}

pub async fn next_progress(rx: &mut UnboundedReceiver<DownloadEvent>) -> (String, Progress) {
    match next_event(rx).await {
        DownloadEvent::Progress { name, progress, .. } => (name, progress),
        other => panic!("expected progress, got {other:?}"),
    }
}

/// Asserts nothing arrives on `rx` within a short grace period.
pub async fn assert_quiet(rx: &mut UnboundedReceiver<DownloadEvent>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected event {event:?}");
    }
}
