//! Download scheduler.
//!
//! Admits transfers through a bounded gate, starts them on the transport and
//! routes transport events to the registry and then to the event sink:
//! `start` → registry insert → admission → transport start → progress* →
//! exactly one of success/failure → registry remove → sink completion.
//!
//! Transport events are messages on a channel consumed by a single loop
//! task, so per-transfer ordering is the order the transport emitted them.

mod gate;

pub use gate::{AdmissionGate, AdmissionSlot};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use url::Url;

use crate::destination::Destination;
use crate::error::{DownloadError, TransferError};
use crate::event::{EventSender, EventSink, Progress, TransportEvent};
use crate::registry::TransferRegistry;
use crate::transfer::{TransferHandle, TransferId};
use crate::transport::Transport;

/// Limits and paths a scheduler runs with.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Maximum transfers transmitting at once (at least one).
    pub max_parallel: usize,
    pub destination: Destination,
    /// Where transports stage in-flight payloads.
    pub staging_dir: PathBuf,
}

pub struct DownloadScheduler {
    registry: TransferRegistry,
    gate: Arc<AdmissionGate>,
    destination: Destination,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    next_id: AtomicU64,
}

impl DownloadScheduler {
    /// Creates the scheduler and spawns its event loop on the current tokio runtime.
    ///
    /// The loop stops once the scheduler is dropped and every transport
    /// holding an `EventSender` has let go of it.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        settings: SchedulerSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            registry: TransferRegistry::new(),
            gate: Arc::new(AdmissionGate::new(settings.max_parallel)),
            destination: settings.destination,
            transport,
            sink,
            events_tx,
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(event_loop(Arc::downgrade(&scheduler), events_rx));
        scheduler
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub fn max_parallel(&self) -> usize {
        self.gate.capacity()
    }

    /// Transfers currently holding an admission slot.
    pub fn active(&self) -> usize {
        self.gate.active()
    }

    /// Highest number of transfers that held a slot at the same time.
    pub fn peak_active(&self) -> usize {
        self.gate.peak()
    }

    /// Starts downloading `source` as task `name`.
    ///
    /// Never blocks: the transfer is registered immediately and begins
    /// transmitting once it gets an admission slot. The outcome is delivered
    /// later through the sink; a transport that refuses the transfer is
    /// reported as a failed completion before this returns.
    /// `name` should be unique among active tasks for name lookups to be unambiguous.
    pub fn start(&self, source: Url, name: &str) -> TransferId {
        let id = self.mint_id();
        self.start_as(id, source, name);
        id
    }

    /// Reserves the id the next `start_as` call will run under.
    pub(crate) fn mint_id(&self) -> TransferId {
        TransferId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// `start` with an id obtained from `mint_id`.
    pub(crate) fn start_as(&self, id: TransferId, source: Url, name: &str) {
        let events = EventSender::new(id, self.events_tx.clone());
        let control = match self.transport.submit(id, &source, events) {
            Ok(control) => control,
            Err(e) => {
                tracing::warn!(transfer = %id, name, "transport refused transfer: {}", e);
                self.sink.on_transfer_completion(id, &source, name, Err(e.into()));
                return;
            }
        };

        let handle = Arc::new(TransferHandle::new(id, source, name, control));
        if let Err(e) = self.registry.insert(Arc::clone(&handle)) {
            tracing::error!(transfer = %id, name, "{}", e);
            let err = TransferError::Submit(e.to_string());
            self.sink.on_transfer_completion(id, handle.source(), handle.name(), Err(err.into()));
            return;
        }
        tracing::debug!(transfer = %id, name, source = %handle.source(), "transfer queued");

        let gate = Arc::clone(&self.gate);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let slot = tokio::select! {
                slot = gate.acquire() => slot,
                () = handle.cancelled_while_queued() => None,
            };
            let started = match slot {
                Some(slot) => handle.admit(slot),
                None => false,
            };
            if started {
                tracing::debug!(transfer = %id, name = handle.name(), "transfer admitted");
            } else {
                tracing::debug!(
                    transfer = %id,
                    name = handle.name(),
                    "transfer cancelled before admission"
                );
                let _ = events_tx.send(TransportEvent::Failed {
                    id,
                    error: TransferError::Cancelled,
                });
            }
        });
    }

    fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Progress {
                id,
                bytes_written,
                bytes_expected,
            } => self.on_progress(id, bytes_written, bytes_expected),
            TransportEvent::Finished { id, staged } => self.on_success(id, &staged),
            TransportEvent::Failed { id, error } => self.on_failure(id, error),
        }
    }

    /// Forwards progress for a registered transfer. Unknown ids are dropped.
    pub fn on_progress(&self, id: TransferId, bytes_written: u64, bytes_expected: Option<u64>) {
        let Some(handle) = self.registry.lookup(id) else {
            tracing::trace!(transfer = %id, "progress for unknown transfer ignored");
            return;
        };
        let progress = Progress::from_bytes(bytes_written, bytes_expected);
        self.sink.on_progress(handle.source(), handle.name(), progress);
    }

    /// Places the staged payload and reports the completion. Unknown ids are a no-op.
    pub fn on_success(&self, id: TransferId, staged: &Path) {
        let Some(handle) = self.finish(id) else {
            tracing::trace!(transfer = %id, "success for unknown transfer ignored");
            return;
        };
        let outcome = self.destination.place(staged, handle.name());
        match &outcome {
            Ok(path) => tracing::info!(
                transfer = %id,
                name = handle.name(),
                "download completed: {}",
                path.display()
            ),
            Err(e) => {
                tracing::warn!(transfer = %id, name = handle.name(), "download not placed: {}", e)
            }
        }
        self.sink.on_transfer_completion(id, handle.source(), handle.name(), outcome);
    }

    /// Reports a transport failure. Unknown ids are a no-op.
    pub fn on_failure(&self, id: TransferId, error: TransferError) {
        let Some(handle) = self.finish(id) else {
            tracing::trace!(transfer = %id, "failure for unknown transfer ignored");
            return;
        };
        tracing::warn!(transfer = %id, name = handle.name(), "download failed: {}", error);
        let outcome = Err(DownloadError::Transport(error));
        self.sink.on_transfer_completion(id, handle.source(), handle.name(), outcome);
    }

    /// Removes a transfer that reached its terminal event and frees its slot.
    fn finish(&self, id: TransferId) -> Option<Arc<TransferHandle>> {
        let handle = self.registry.remove(id)?;
        handle.release_slot();
        Some(handle)
    }

    /// Suspends the task named `name` in place. Returns false if no such task is active.
    pub fn pause(&self, name: &str) -> bool {
        let Some(handle) = self.registry.lookup_by_name(name) else {
            tracing::debug!(name, "pause: no active task");
            return false;
        };
        let changed = handle.pause();
        tracing::debug!(transfer = %handle.id(), name, changed, "pause");
        changed
    }

    /// Resumes the suspended task named `name`. Returns false if nothing was resumed.
    pub fn resume(&self, name: &str) -> bool {
        let Some(handle) = self.registry.lookup_by_name(name) else {
            tracing::debug!(name, "resume: no active task");
            return false;
        };
        let changed = handle.resume();
        tracing::debug!(transfer = %handle.id(), name, changed, "resume");
        changed
    }

    /// Cancels the task named `name`. Its completion arrives as a
    /// `Cancelled` failure and its slot is freed like any other terminal event.
    pub fn cancel(&self, name: &str) -> bool {
        let Some(handle) = self.registry.lookup_by_name(name) else {
            tracing::debug!(name, "cancel: no active task");
            return false;
        };
        let changed = handle.cancel();
        tracing::debug!(transfer = %handle.id(), name, changed, "cancel");
        changed
    }
}

impl Drop for DownloadScheduler {
    fn drop(&mut self) {
        // Wakes transfers still waiting for admission so their tasks exit.
        self.gate.close();
    }
}

async fn event_loop(
    scheduler: Weak<DownloadScheduler>,
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        let Some(scheduler) = scheduler.upgrade() else {
            break;
        };
        scheduler.dispatch(event);
    }
    tracing::debug!("scheduler event loop stopped");
}
