//! Registry of in-flight transfers, keyed by `TransferId`.
//!
//! The key set equals the set of transfers that were started and have not
//! yet reached their terminal event. A single mutex guards the whole map.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::transfer::{TransferHandle, TransferId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("transfer {0} is already registered")]
    Duplicate(TransferId),
}

/// Shared map of transfer id -> handle. Safe to use from transport callback
/// threads, the scheduler loop and control calls at the same time.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: Mutex<BTreeMap<TransferId, Arc<TransferHandle>>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<TransferId, Arc<TransferHandle>>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a handle under its id. An id that is already present is rejected.
    pub fn insert(&self, handle: Arc<TransferHandle>) -> Result<(), RegistryError> {
        let mut map = self.map();
        let id = handle.id();
        if map.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        map.insert(id, handle);
        Ok(())
    }

    pub fn lookup(&self, id: TransferId) -> Option<Arc<TransferHandle>> {
        self.map().get(&id).cloned()
    }

    /// First handle with `name`, in start order.
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<TransferHandle>> {
        self.map().values().find(|h| h.name() == name).cloned()
    }

    /// Removes and returns the handle for `id`. Removing an absent id is a no-op.
    pub fn remove(&self, id: TransferId) -> Option<Arc<TransferHandle>> {
        self.map().remove(&id)
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.map().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Names of all registered transfers, in start order.
    pub fn names(&self) -> Vec<String> {
        self.map().values().map(|h| h.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransferControl;
    use url::Url;

    struct Inert;

    impl TransferControl for Inert {
        fn start(&self) {}
        fn suspend(&self) {}
        fn resume(&self) {}
        fn cancel(&self) {}
    }

    fn handle(id: u64, name: &str) -> Arc<TransferHandle> {
        let url = Url::parse("https://example.com/file.zip").unwrap();
        Arc::new(TransferHandle::new(TransferId::new(id), url, name, Box::new(Inert)))
    }

    #[test]
    fn insert_lookup_remove() {
        let reg = TransferRegistry::new();
        reg.insert(handle(1, "item_1")).unwrap();
        reg.insert(handle(2, "item_2")).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lookup(TransferId::new(2)).unwrap().name(), "item_2");
        assert!(reg.lookup(TransferId::new(3)).is_none());

        assert!(reg.remove(TransferId::new(1)).is_some());
        assert!(reg.remove(TransferId::new(1)).is_none());
        assert!(!reg.contains(TransferId::new(1)));
        assert_eq!(reg.names(), vec!["item_2".to_string()]);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let reg = TransferRegistry::new();
        reg.insert(handle(7, "a")).unwrap();
        assert_eq!(
            reg.insert(handle(7, "b")),
            Err(RegistryError::Duplicate(TransferId::new(7)))
        );
        assert_eq!(reg.lookup(TransferId::new(7)).unwrap().name(), "a");
    }

    #[test]
    fn lookup_by_name_returns_oldest_match() {
        let reg = TransferRegistry::new();
        reg.insert(handle(5, "dup")).unwrap();
        reg.insert(handle(3, "dup")).unwrap();
        reg.insert(handle(4, "other")).unwrap();
        assert_eq!(reg.lookup_by_name("dup").unwrap().id(), TransferId::new(3));
        assert!(reg.lookup_by_name("missing").is_none());
    }

    #[test]
    fn concurrent_insert_and_remove() {
        let reg = Arc::new(TransferRegistry::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for i in 0..50u64 {
                        let id = t * 1000 + i;
                        reg.insert(handle(id, &format!("t{t}_{i}"))).unwrap();
                        if i % 2 == 0 {
                            reg.remove(TransferId::new(id));
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(reg.len(), 8 * 25);
    }
}
