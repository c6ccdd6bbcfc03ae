//! Claim engine: the single entry point for producing, claiming and
//! finishing jobs.

use chrono::Utc;
use courier_core::{
    Error, Job, JobEvent, JobId, JobNotifier, JobState, JobStore, NewJob, Outcome, OutcomeReport,
    Result, SubscriptionId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::locks::LockTable;

const MAX_CLAIMANT_LEN: usize = 128;

/// Tuning for the claim engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest a claim waits for its subscription lock.
    pub claim_wait: Duration,
    /// Refuse a claim while the claimant already holds a job in the subscription.
    pub single_in_flight: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_wait: Duration::from_millis(250),
            single_in_flight: false,
        }
    }
}

/// Serialises claims per subscription on top of a [`JobStore`].
pub struct ClaimEngine {
    store: Arc<dyn JobStore>,
    locks: LockTable,
    config: EngineConfig,
    notifier: Option<Arc<dyn JobNotifier>>,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn JobStore>, config: EngineConfig) -> Self {
        Self {
            store,
            locks: LockTable::new(),
            config,
            notifier: None,
        }
    }

    /// Announce job lifecycle events through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue a new job and announce that it is available.
    pub async fn enqueue(
        &self,
        subscription: SubscriptionId,
        payload: serde_json::Value,
    ) -> Result<Job> {
        let job = self
            .store
            .insert(NewJob {
                subscription_id: subscription,
                payload,
            })
            .await?;
        info!(job_id = %job.id, subscription = %job.subscription_id, sequence = job.sequence, "Enqueued job");
        self.announce(JobEvent::available(&job)).await;
        Ok(job)
    }

    /// Claim the oldest pending job of `subscription` for `claimant`.
    ///
    /// Returns `Ok(None)` when nothing is pending, and also when the
    /// subscription lock could not be taken within `claim_wait`: a busy
    /// queue answers "no job" promptly instead of queueing the request.
    pub async fn claim_oldest(
        &self,
        subscription: &SubscriptionId,
        claimant: &str,
    ) -> Result<Option<Job>> {
        validate_claimant(claimant)?;

        let Some(_guard) = self.locks.acquire(subscription, self.config.claim_wait).await else {
            debug!(subscription = %subscription, claimant, "Claim lock busy, reporting no job");
            return Ok(None);
        };

        if self.config.single_in_flight && self.store.has_claimed(subscription, claimant).await? {
            return Err(Error::ClaimantBusy(format!(
                "{} already holds a claimed job in {}",
                claimant, subscription
            )));
        }

        let job = self.store.claim_oldest(subscription, claimant).await?;
        match &job {
            Some(job) => {
                info!(job_id = %job.id, subscription = %subscription, claimant, attempts = job.attempts, "Claimed job");
            }
            None => {
                debug!(subscription = %subscription, claimant, "No job available");
            }
        }
        Ok(job)
    }

    /// Record the outcome of a claimed job.
    ///
    /// Re-reporting the same outcome succeeds without side effects.
    pub async fn report_outcome(
        &self,
        id: JobId,
        outcome: Outcome,
        error: Option<String>,
    ) -> Result<Job> {
        let OutcomeReport { job, applied } = self.store.report_outcome(id, outcome, error).await?;
        if applied {
            info!(job_id = %id, subscription = %job.subscription_id, %outcome, "Job finished");
            if let Some(event) = JobEvent::finished(&job) {
                self.announce(event).await;
            }
        } else {
            debug!(job_id = %id, %outcome, "Duplicate outcome report ignored");
        }
        Ok(job)
    }

    /// Return jobs claimed longer than `older_than` ago to pending.
    pub async fn reclaim_expired(&self, older_than: Duration) -> Result<Vec<Job>> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| Error::InvalidInput(format!("reclaim timeout out of range: {}", e)))?;
        let jobs = self.store.reclaim_expired(Utc::now() - older_than).await?;
        for job in &jobs {
            warn!(job_id = %job.id, subscription = %job.subscription_id, attempts = job.attempts, "Reclaimed expired job");
            self.announce(JobEvent::reclaimed(job)).await;
        }
        Ok(jobs)
    }

    pub async fn get(&self, id: JobId) -> Result<Job> {
        self.store.get(id).await
    }

    pub async fn pending_count(&self, subscription: &SubscriptionId) -> Result<i64> {
        self.store.pending_count(subscription).await
    }

    pub async fn list(
        &self,
        subscription: &SubscriptionId,
        state: Option<JobState>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        self.store.list(subscription, state, limit).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Forget claim locks nobody is using.
    pub async fn prune_locks(&self) -> usize {
        self.locks.prune_idle().await
    }

    async fn announce(&self, event: JobEvent) {
        if let Some(notifier) = &self.notifier {
            let delivered = notifier.notify(&event).await;
            debug!(job_id = %event.job_id(), delivered, "Announced job event");
        }
    }
}

fn validate_claimant(claimant: &str) -> Result<()> {
    if claimant.trim().is_empty() || claimant.len() > MAX_CLAIMANT_LEN {
        return Err(Error::InvalidInput(format!(
            "claimant must be 1-{} characters",
            MAX_CLAIMANT_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryJobStore;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    fn sub(name: &str) -> SubscriptionId {
        name.parse().unwrap()
    }

    fn engine() -> ClaimEngine {
        ClaimEngine::new(Arc::new(MemoryJobStore::new()), EngineConfig::default())
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<JobEvent>>,
    }

    #[async_trait::async_trait]
    impl JobNotifier for RecordingNotifier {
        async fn notify(&self, event: &JobEvent) -> usize {
            self.events.lock().await.push(event.clone());
            1
        }
    }

    #[tokio::test]
    async fn test_two_jobs_two_consumers_then_empty() {
        let engine = Arc::new(engine());
        let j1 = engine.enqueue(sub("S1"), json!({"n": 1})).await.unwrap();
        let j2 = engine.enqueue(sub("S1"), json!({"n": 2})).await.unwrap();

        let (sa, sb) = (sub("S1"), sub("S1"));
        let (a, b) = tokio::join!(
            engine.claim_oldest(&sa, "A"),
            engine.claim_oldest(&sb, "B"),
        );
        let mut got: Vec<JobId> = vec![a.unwrap().unwrap().id, b.unwrap().unwrap().id];
        got.sort();
        let mut expected = vec![j1.id, j2.id];
        expected.sort();
        assert_eq!(got, expected);

        assert!(engine.claim_oldest(&sub("S1"), "C").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_hand_out_each_job_once_in_order() {
        let engine = Arc::new(ClaimEngine::new(
            Arc::new(MemoryJobStore::new()),
            EngineConfig {
                claim_wait: Duration::from_secs(5),
                single_in_flight: false,
            },
        ));
        const JOBS: usize = 200;
        for n in 0..JOBS {
            engine.enqueue(sub("S1"), json!({ "n": n })).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = engine
                    .claim_oldest(&sub("S1"), &format!("worker-{}", worker))
                    .await
                    .unwrap()
                {
                    claimed.push(job.sequence);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in futures::future::join_all(handles).await {
            let claimed = handle.unwrap();
            // Each consumer sees jobs in ascending order.
            assert!(claimed.windows(2).all(|w| w[0] < w[1]));
            all.extend(claimed);
        }
        assert_eq!(all.len(), JOBS);
        let distinct: HashSet<_> = all.iter().collect();
        assert_eq!(distinct.len(), JOBS);
    }

    #[tokio::test]
    async fn test_busy_lock_returns_no_job_promptly() {
        let engine = ClaimEngine::new(
            Arc::new(MemoryJobStore::new()),
            EngineConfig {
                claim_wait: Duration::from_millis(20),
                single_in_flight: false,
            },
        );
        engine.enqueue(sub("S1"), json!({})).await.unwrap();

        let _held = engine
            .locks
            .acquire(&sub("S1"), Duration::from_millis(20))
            .await
            .unwrap();
        let started = std::time::Instant::now();
        assert!(engine.claim_oldest(&sub("S1"), "A").await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.pending_count(&sub("S1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_claim_releases_lock() {
        let engine = Arc::new(engine());
        engine.enqueue(sub("S1"), json!({})).await.unwrap();

        let held = engine
            .locks
            .acquire(&sub("S1"), Duration::from_millis(20))
            .await
            .unwrap();
        let waiting = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.claim_oldest(&sub("S1"), "A").await })
        };
        tokio::task::yield_now().await;
        waiting.abort();
        let _ = waiting.await;
        drop(held);

        let job = engine.claim_oldest(&sub("S1"), "B").await.unwrap().unwrap();
        assert_eq!(job.claimed_by.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_other_subscriptions_are_not_blocked() {
        let engine = engine();
        engine.enqueue(sub("S2"), json!({})).await.unwrap();
        let _held = engine
            .locks
            .acquire(&sub("S1"), Duration::from_millis(20))
            .await
            .unwrap();

        assert!(engine.claim_oldest(&sub("S2"), "A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_single_in_flight_refuses_busy_claimant() {
        let engine = ClaimEngine::new(
            Arc::new(MemoryJobStore::new()),
            EngineConfig {
                single_in_flight: true,
                ..EngineConfig::default()
            },
        );
        let j1 = engine.enqueue(sub("S1"), json!({})).await.unwrap();
        engine.enqueue(sub("S1"), json!({})).await.unwrap();

        engine.claim_oldest(&sub("S1"), "A").await.unwrap().unwrap();
        assert_matches!(
            engine.claim_oldest(&sub("S1"), "A").await,
            Err(Error::ClaimantBusy(_))
        );
        assert!(engine.claim_oldest(&sub("S1"), "B").await.unwrap().is_some());

        engine
            .report_outcome(j1.id, Outcome::Completed, None)
            .await
            .unwrap();
        assert!(engine.claim_oldest(&sub("S1"), "A").await.is_ok());
    }

    #[tokio::test]
    async fn test_claimant_is_validated() {
        let engine = engine();
        assert_matches!(
            engine.claim_oldest(&sub("S1"), "  ").await,
            Err(Error::InvalidInput(_))
        );
    }

    #[tokio::test]
    async fn test_outcome_reports() {
        let engine = engine();
        let job = engine.enqueue(sub("S1"), json!({})).await.unwrap();
        engine.claim_oldest(&sub("S1"), "A").await.unwrap();

        let done = engine
            .report_outcome(job.id, Outcome::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Completed);
        engine
            .report_outcome(job.id, Outcome::Completed, None)
            .await
            .unwrap();
        assert_matches!(
            engine.report_outcome(job.id, Outcome::Failed, None).await,
            Err(Error::InvalidTransition { .. })
        );
        assert_matches!(
            engine
                .report_outcome(JobId::new(), Outcome::Failed, None)
                .await,
            Err(Error::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_reclaim_scenario() {
        let engine = engine();
        let j3 = engine.enqueue(sub("S1"), json!({"n": 3})).await.unwrap();
        engine.claim_oldest(&sub("S1"), "X").await.unwrap().unwrap();
        let j4 = engine.enqueue(sub("S1"), json!({"n": 4})).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let reclaimed = engine
            .reclaim_expired(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, j3.id);

        let next = engine.claim_oldest(&sub("S1"), "Y").await.unwrap().unwrap();
        assert_eq!(next.id, j3.id);
        let after = engine.claim_oldest(&sub("S1"), "Y").await.unwrap().unwrap();
        assert_eq!(after.id, j4.id);
    }

    #[tokio::test]
    async fn test_late_report_after_reclaim_is_rejected() {
        let engine = engine();
        let job = engine.enqueue(sub("S1"), json!({})).await.unwrap();
        engine.claim_oldest(&sub("S1"), "X").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine
            .reclaim_expired(Duration::from_millis(5))
            .await
            .unwrap();

        assert_matches!(
            engine.report_outcome(job.id, Outcome::Completed, None).await,
            Err(Error::InvalidTransition {
                from: JobState::Pending,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_notifier_sees_lifecycle_without_duplicates() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine().with_notifier(notifier.clone());

        let job = engine.enqueue(sub("S1"), json!({"secret": 1})).await.unwrap();
        engine.claim_oldest(&sub("S1"), "A").await.unwrap();
        engine
            .report_outcome(job.id, Outcome::Failed, Some("boom".into()))
            .await
            .unwrap();
        engine
            .report_outcome(job.id, Outcome::Failed, None)
            .await
            .unwrap();

        let events = notifier.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_matches!(&events[0], JobEvent::JobAvailable { job_id, .. } if *job_id == job.id);
        assert_matches!(&events[1], JobEvent::JobFailed { job_id, .. } if *job_id == job.id);
    }

    #[tokio::test]
    async fn test_store_outage_is_surfaced() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = ClaimEngine::new(store.clone(), EngineConfig::default());
        store.set_unavailable(true);

        let err = engine.claim_oldest(&sub("S1"), "A").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
