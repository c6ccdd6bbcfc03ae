//! In-process job store.
//!
//! Jobs live in one partition per subscription, each behind its own mutex,
//! so claims in different subscriptions never contend. Within a partition
//! pending jobs are indexed by sequence, which makes "claim the oldest" a
//! pop of the first entry and lets reclaimed jobs slot back in ahead of
//! anything inserted after them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    Error, Job, JobId, JobState, JobStore, NewJob, Outcome, OutcomeReport, Result,
    SubscriptionId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct Partition {
    jobs: HashMap<JobId, Job>,
    /// Pending jobs by sequence.
    pending: BTreeMap<i64, JobId>,
}

/// Non-durable `JobStore` kept entirely in memory.
pub struct MemoryJobStore {
    partitions: RwLock<HashMap<SubscriptionId, Arc<Mutex<Partition>>>>,
    owners: RwLock<HashMap<JobId, SubscriptionId>>,
    next_sequence: AtomicI64,
    unavailable: AtomicBool,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
            next_sequence: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while set, every operation fails with
    /// `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    async fn partition(&self, subscription: &SubscriptionId) -> Option<Arc<Mutex<Partition>>> {
        self.partitions.read().await.get(subscription).cloned()
    }

    async fn partition_or_create(&self, subscription: &SubscriptionId) -> Arc<Mutex<Partition>> {
        if let Some(partition) = self.partition(subscription).await {
            return partition;
        }
        self.partitions
            .write()
            .await
            .entry(subscription.clone())
            .or_default()
            .clone()
    }

    async fn partition_of(&self, id: JobId) -> Result<Arc<Mutex<Partition>>> {
        let subscription = self
            .owners
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        self.partition(&subscription)
            .await
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, new: NewJob) -> Result<Job> {
        self.check_available()?;
        let partition = self.partition_or_create(&new.subscription_id).await;
        let id = JobId::new();

        // Register the owner first so the job is addressable by id as soon
        // as it becomes claimable.
        self.owners
            .write()
            .await
            .insert(id, new.subscription_id.clone());

        // The sequence is taken under the partition lock so that, within a
        // subscription, sequence order matches the order jobs become visible.
        let mut partition = partition.lock().await;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            id,
            subscription_id: new.subscription_id,
            payload: new.payload,
            state: JobState::Pending,
            sequence,
            created_at: Utc::now(),
            claimed_by: None,
            claimed_at: None,
            finished_at: None,
            attempts: 0,
            error: None,
        };
        partition.pending.insert(sequence, job.id);
        partition.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        self.check_available()?;
        let partition = self.partition_of(id).await?;
        let partition = partition.lock().await;
        partition
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    async fn claim_oldest(
        &self,
        subscription: &SubscriptionId,
        claimant: &str,
    ) -> Result<Option<Job>> {
        self.check_available()?;
        let Some(partition) = self.partition(subscription).await else {
            return Ok(None);
        };
        let mut partition = partition.lock().await;
        let Some((_, id)) = partition.pending.pop_first() else {
            return Ok(None);
        };
        let job = partition
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("pending index references missing job {}", id)))?;
        job.state = JobState::Claimed;
        job.claimed_by = Some(claimant.to_string());
        job.claimed_at = Some(Utc::now());
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn report_outcome(
        &self,
        id: JobId,
        outcome: Outcome,
        error: Option<String>,
    ) -> Result<OutcomeReport> {
        self.check_available()?;
        let partition = self.partition_of(id).await?;
        let mut partition = partition.lock().await;
        let job = partition
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;

        let applied = job.check_outcome(outcome)?;
        if applied {
            job.state = outcome.target_state();
            job.finished_at = Some(Utc::now());
            job.error = error;
        }
        Ok(OutcomeReport {
            job: job.clone(),
            applied,
        })
    }

    async fn reclaim_expired(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Job>> {
        self.check_available()?;
        let partitions: Vec<_> = self.partitions.read().await.values().cloned().collect();

        let mut reclaimed = Vec::new();
        for partition in partitions {
            let mut partition = partition.lock().await;
            let Partition { jobs, pending } = &mut *partition;
            for job in jobs.values_mut() {
                let expired = job.state == JobState::Claimed
                    && job.claimed_at.is_some_and(|at| at < claimed_before);
                if expired {
                    job.state = JobState::Pending;
                    job.claimed_by = None;
                    job.claimed_at = None;
                    pending.insert(job.sequence, job.id);
                    reclaimed.push(job.clone());
                }
            }
        }
        reclaimed.sort_by_key(|job| job.sequence);
        Ok(reclaimed)
    }

    async fn pending_count(&self, subscription: &SubscriptionId) -> Result<i64> {
        self.check_available()?;
        match self.partition(subscription).await {
            Some(partition) => Ok(partition.lock().await.pending.len() as i64),
            None => Ok(0),
        }
    }

    async fn list(
        &self,
        subscription: &SubscriptionId,
        state: Option<JobState>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        self.check_available()?;
        let Some(partition) = self.partition(subscription).await else {
            return Ok(Vec::new());
        };
        let partition = partition.lock().await;
        let mut jobs: Vec<Job> = partition
            .jobs
            .values()
            .filter(|job| state.is_none_or(|s| job.state == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(jobs)
    }

    async fn has_claimed(&self, subscription: &SubscriptionId, claimant: &str) -> Result<bool> {
        self.check_available()?;
        let Some(partition) = self.partition(subscription).await else {
            return Ok(false);
        };
        let partition = partition.lock().await;
        Ok(partition.jobs.values().any(|job| {
            job.state == JobState::Claimed && job.claimed_by.as_deref() == Some(claimant)
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
