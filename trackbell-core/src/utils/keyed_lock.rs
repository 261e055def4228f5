//! One async mutex per key.
//!
//! Writers that must not interleave for the same tracking key (registration,
//! unregistration, persisting a fetch) take the key's lock; different keys
//! never contend. Guards are owned so they can be held across `.await`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = self.entries().entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Forget the lock of `key` if nobody holds or awaits it.
    pub fn prune(&self, key: &K) {
        let mut entries = self.entries();
        let idle = entries
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Arc<AsyncMutex<()>>>> {
        // The map is only mutated in short non-panicking sections.
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
