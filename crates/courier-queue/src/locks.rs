//! Per-subscription claim locks.

use courier_core::SubscriptionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by subscription.
///
/// Claims for one subscription queue behind each other; claims for
/// different subscriptions never share a lock.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<SubscriptionId, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `subscription`, waiting at most `wait`.
    ///
    /// Returns `None` when the wait elapses. Dropping the returned guard (or
    /// the future, while still waiting) releases everything.
    pub async fn acquire(
        &self,
        subscription: &SubscriptionId,
        wait: Duration,
    ) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(subscription.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }

    /// Drop entries nobody is holding or waiting on. Returns how many were removed.
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
