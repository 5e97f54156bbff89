//! Admission gate: caps how many transfers may transmit at once.
//!
//! A transfer acquires an `AdmissionSlot` before it starts and keeps it until
//! its terminal event, paused or not. Waiters are served FIFO.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Highest number of slots held at the same time since creation.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Waits for a free slot. Returns `None` only if the gate was closed.
    pub async fn acquire(&self) -> Option<AdmissionSlot> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Some(AdmissionSlot {
            active: Arc::clone(&self.active),
            _permit: permit,
        })
    }

    /// Wakes every waiter with `None`; held slots stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A held slot. Dropping it frees the slot for the next waiter.
#[derive(Debug)]
pub struct AdmissionSlot {
    active: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        // Runs before the permit field drops, so `active` never exceeds held permits.
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
