//! One admitted download: its identity, its transport handle and its task state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use url::Url;

use crate::scheduler::AdmissionSlot;
use crate::transport::TransferControl;

/// Opaque identifier of a transfer, minted by the scheduler at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Semantic status of a logical download, as shown to a user.
///
/// Failures are not a state here: they arrive as an `Err` completion outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Pending,
    InProgress(u8),
    Completed,
}

impl TaskState {
    pub fn label(self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::InProgress(_) => "Downloading",
            TaskState::Completed => "Completed",
        }
    }

    /// Moves to `next` unless that would go backwards. Returns the resulting state.
    ///
    /// Percent values above 100 are clamped; `Completed` is absorbing.
    pub fn advance(self, next: TaskState) -> TaskState {
        match (self, next) {
            (TaskState::Completed, _) => TaskState::Completed,
            (_, TaskState::Completed) => TaskState::Completed,
            (TaskState::InProgress(cur), TaskState::InProgress(new)) => {
                TaskState::InProgress(cur.max(new.min(100)))
            }
            (TaskState::Pending, TaskState::InProgress(new)) => TaskState::InProgress(new.min(100)),
            (state, TaskState::Pending) => state,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::InProgress(p) => write!(f, "{} {}%", self.label(), p),
            _ => f.write_str(self.label()),
        }
    }
}

/// Where a transfer is in its admission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Cancelled,
}

/// A started transfer plus its logical identity.
///
/// Owns the transport-level control handle. The registry holds it by
/// `TransferId`, never by reference identity.
pub struct TransferHandle {
    id: TransferId,
    source: Url,
    name: String,
    control: Box<dyn TransferControl>,
    phase: Mutex<Phase>,
    paused: AtomicBool,
    slot: Mutex<Option<AdmissionSlot>>,
    cancel_signal: Notify,
}

impl TransferHandle {
    pub fn new(
        id: TransferId,
        source: Url,
        name: impl Into<String>,
        control: Box<dyn TransferControl>,
    ) -> Self {
        Self {
            id,
            source,
            name: name.into(),
            control,
            phase: Mutex::new(Phase::Queued),
            paused: AtomicBool::new(false),
            slot: Mutex::new(None),
            cancel_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// True once the transport has been told to start transmitting.
    pub fn is_running(&self) -> bool {
        *lock(&self.phase) == Phase::Running
    }

    /// Hands the admission slot to the transfer and starts it.
    ///
    /// Returns false without starting if the transfer was cancelled while it
    /// waited for admission; the slot is still stored so the terminal event
    /// releases it.
    pub(crate) fn admit(&self, slot: AdmissionSlot) -> bool {
        *lock(&self.slot) = Some(slot);
        let mut phase = lock(&self.phase);
        if *phase == Phase::Cancelled {
            return false;
        }
        *phase = Phase::Running;
        self.control.start();
        true
    }

    /// Resolves once `cancel` is called on a transfer that is still queued.
    pub(crate) async fn cancelled_while_queued(&self) {
        self.cancel_signal.notified().await;
    }

    /// Releases the admission slot, if held. Safe to call more than once.
    pub(crate) fn release_slot(&self) -> bool {
        lock(&self.slot).take().is_some()
    }

    /// Suspends the transfer in place. Returns false if it was already paused.
    pub(crate) fn pause(&self) -> bool {
        if self.paused.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.control.suspend();
        true
    }

    /// Resumes a suspended transfer. Returns false if it was not paused.
    pub(crate) fn resume(&self) -> bool {
        if !self.paused.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.control.resume();
        true
    }

    /// Requests cancellation. A queued transfer is marked so admission fails
    /// it instead of starting it; a running one is cancelled by the transport.
    pub(crate) fn cancel(&self) -> bool {
        let mut phase = lock(&self.phase);
        match *phase {
            Phase::Queued => {
                *phase = Phase::Cancelled;
                self.cancel_signal.notify_one();
                true
            }
            Phase::Running => {
                self.control.cancel();
                true
            }
            Phase::Cancelled => false,
        }
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("id", &self.id)
            .field("source", &self.source.as_str())
            .field("name", &self.name)
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
