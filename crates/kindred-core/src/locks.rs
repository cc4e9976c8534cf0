use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use kindred_types::models::PairKey;

/// One mutex per canonical pair, created on demand and dropped once idle.
///
/// Unrelated pairs never contend; the map itself is sharded.
#[derive(Default)]
pub struct PairLocks {
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `pair`.
    pub fn with_lock<T>(&self, pair: PairKey, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.entry(pair).or_default().clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        drop(lock);
        // Only the map's own reference left: nobody holds or waits on it.
        self.locks
            .remove_if(&pair, |_, slot| Arc::strong_count(slot) == 1);

        result
    }

    /// Number of pairs with a live lock slot.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
