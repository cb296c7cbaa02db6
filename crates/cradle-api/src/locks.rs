//! Per-identity serialization of mutating operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Keyed async mutexes. Operations on different keys run concurrently;
/// operations on the same key run one at a time, in arrival order.
#[derive(Clone, Default)]
pub struct IdentityLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> IdentityGuard {
        let mutex = self
            .map()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        IdentityGuard {
            key: key.to_string(),
            locks: self.inner.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the duration of one operation. The key's entry is pruned when
/// the last holder or waiter goes away.
pub struct IdentityGuard {
    key: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            map.remove(&self.key);
        }
    }
}
