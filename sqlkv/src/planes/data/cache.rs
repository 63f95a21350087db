use crate::domain::CacheValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Key to snapshot map guarded by a single mutex.
///
/// Every method takes the lock for one map operation only. Callers must never
/// hold a guard across a backing store round trip, which is why no guard ever
/// leaves this type.
#[derive(Debug, Default)]
pub struct Cache {
    entries: Mutex<HashMap<String, CacheValue>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheValue>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.lock().get(key).cloned()
    }

    /// Inserts or overwrites the entry for `key`.
    pub fn put(&self, key: impl Into<String>, value: CacheValue) {
        self.lock().insert(key.into(), value);
    }

    /// Removes the entry for `key`, returning whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn snapshot_keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
