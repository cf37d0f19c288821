use crate::types::AggregateKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-aggregate async mutexes shared by every chain worker.
///
/// Keys are always acquired in sorted order, so two events touching
/// overlapping key sets cannot deadlock. Entries are dropped once nobody
/// holds or waits for them.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<AggregateKey, Arc<Mutex<()>>>,
}

pub struct KeyGuards<'a> {
    owner: &'a KeyLocks,
    guards: Vec<(AggregateKey, OwnedMutexGuard<()>)>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, mut keys: Vec<AggregateKey>) -> KeyGuards<'_> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.locks.entry(key).or_default().clone();
            guards.push((key, mutex.lock_owned().await));
        }
        KeyGuards {
            owner: self,
            guards,
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyGuards<'_> {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain(..) {
            drop(guard);
            self.owner
                .locks
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
