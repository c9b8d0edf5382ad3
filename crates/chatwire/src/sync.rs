//! Synchronization primitives for chatwire.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Per-key async mutex.
///
/// Operations on different keys run concurrently; operations on the same key
/// are serialized. Entries are dropped again by [`KeyedLocks::release`] once
/// nobody else references them, so the map stays proportional to the number
/// of keys currently in use.
///
/// ```ignore
/// let locks = KeyedLocks::new();
/// let lock = locks.get("s1");
/// let _guard = lock.lock().await;
/// // a second locks.get("s1").lock().await waits here
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for `key`.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `key` if no caller still holds a reference to it.
    ///
    /// Call after the guard and the `Arc` returned by [`get`](Self::get) are
    /// gone. Returns whether the entry was removed.
    pub fn release(&self, key: &str) -> bool {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
