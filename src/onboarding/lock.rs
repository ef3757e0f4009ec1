//! One turn at a time per session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::onboarding::model::SessionKey;

type LockMap = HashMap<SessionKey, Arc<Mutex<()>>>;

/// Per-session async locks. A second turn for the same (role, owner)
/// waits until the first has finished writing its transcript.
///
/// Entries live only while someone holds or waits on them, so anonymous
/// traffic does not accumulate.
#[derive(Default)]
pub struct SessionLocks {
    locks: Arc<StdMutex<LockMap>>,
}

/// Held for the duration of a turn. Releasing the last guard for a key
/// removes its entry.
pub struct SessionGuard {
    key: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<StdMutex<LockMap>>,
}

fn entries(locks: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    // The map holds no invariant a panicking holder could break.
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &SessionKey) -> SessionGuard {
        let mutex = entries(&self.locks).entry(key.clone()).or_default().clone();
        SessionGuard {
            key: key.clone(),
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of sessions currently locked or waited on.
    pub fn len(&self) -> usize {
        entries(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release the mutex (and the Arc it holds) before counting.
        self.guard.take();
        let mut locks = entries(&self.locks);
        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
