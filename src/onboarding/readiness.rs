//! Authentication readiness signal.
//!
//! Sign-in links anonymous sessions and advances their state. A redirect
//! request that arrives mid-way would read half-linked state, so it waits
//! here for the single writer (`authenticate`) to publish "ready".

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{RwLock, watch};

/// A sign-in in progress. Overlapping sign-ins for one user share it.
struct Pending {
    tx: watch::Sender<bool>,
    in_flight: usize,
}

#[derive(Default)]
pub struct ReadinessBoard {
    users: RwLock<HashMap<String, Pending>>,
}

impl ReadinessBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the user as mid-authentication.
    pub async fn begin(&self, user_id: &str) {
        let mut users = self.users.write().await;
        let pending = users.entry(user_id.to_string()).or_insert_with(|| Pending {
            tx: watch::channel(false).0,
            in_flight: 0,
        });
        pending.in_flight += 1;
    }

    /// Publish that everything `authenticate` wrote is committed. The last
    /// sign-in to finish wakes the waiters and drops the entry.
    pub async fn finish(&self, user_id: &str) {
        let mut users = self.users.write().await;
        let Some(pending) = users.get_mut(user_id) else {
            return;
        };
        pending.in_flight = pending.in_flight.saturating_sub(1);
        if pending.in_flight == 0
            && let Some(pending) = users.remove(user_id)
        {
            pending.tx.send_replace(true);
        }
    }

    /// Users with a sign-in in progress.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Wait until the user is ready. Users never seen are ready. Returns
    /// false if `timeout` elapsed first; callers proceed anyway.
    pub async fn wait(&self, user_id: &str, timeout: Duration) -> bool {
        let mut rx = match self.users.read().await.get(user_id) {
            Some(pending) => pending.tx.subscribe(),
            None => return true,
        };
        // A closed channel means the sign-in finished and its entry is gone.
        match tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(user = user_id, ?timeout, "Authentication not ready, reading anyway");
                false
            }
        }
    }
}
