//! Background sweep that returns expired claims to the queue.

use courier_core::{Job, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::engine::ClaimEngine;

/// Periodically reclaims jobs whose claim outlived `reclaim_after`.
pub struct Reaper {
    engine: Arc<ClaimEngine>,
    reclaim_after: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(engine: Arc<ClaimEngine>, reclaim_after: Duration, interval: Duration) -> Self {
        Self {
            engine,
            reclaim_after,
            interval,
        }
    }

    /// Run a single sweep, then drop claim locks nobody holds.
    pub async fn sweep_once(&self) -> Result<Vec<Job>> {
        let reclaimed = self.engine.reclaim_expired(self.reclaim_after).await?;
        let pruned = self.engine.prune_locks().await;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "Reclaimed expired jobs");
        }
        debug!(pruned, "Pruned idle claim locks");
        Ok(reclaimed)
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                reclaim_after_secs = self.reclaim_after.as_secs(),
                interval_secs = self.interval.as_secs(),
                "Starting reclaim sweep"
            );
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(error = %e, "Reclaim sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Reclaim sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::memory::MemoryJobStore;
    use courier_core::{JobState, SubscriptionId};
    use serde_json::json;

    fn sub() -> SubscriptionId {
        "S1".parse().unwrap()
    }

    fn engine() -> Arc<ClaimEngine> {
        Arc::new(ClaimEngine::new(
            Arc::new(MemoryJobStore::new()),
            EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_sweep_returns_stale_claims() {
        let engine = engine();
        let job = engine.enqueue(sub(), json!({})).await.unwrap();
        engine.claim_oldest(&sub(), "A").await.unwrap().unwrap();

        let reaper = Reaper::new(
            engine.clone(),
            Duration::from_millis(5),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reclaimed = reaper.sweep_once().await.unwrap();

        assert_eq!(reclaimed.len(), 1);
        assert_eq!(engine.get(job.id).await.unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_claims() {
        let engine = engine();
        engine.enqueue(sub(), json!({})).await.unwrap();
        engine.claim_oldest(&sub(), "A").await.unwrap().unwrap();

        let reaper = Reaper::new(
            engine.clone(),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        assert!(reaper.sweep_once().await.unwrap().is_empty());
        assert_eq!(engine.pending_count(&sub()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_sweep_stops_on_shutdown() {
        let engine = engine();
        let job = engine.enqueue(sub(), json!({})).await.unwrap();
        engine.claim_oldest(&sub(), "A").await.unwrap().unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = Reaper::new(
            engine.clone(),
            Duration::from_millis(5),
            Duration::from_millis(10),
        )
        .spawn(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.get(job.id).await.unwrap().state, JobState::Pending);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
