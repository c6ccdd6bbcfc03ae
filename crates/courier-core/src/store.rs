//! Job store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::id::JobId;
use crate::job::{Job, JobState, NewJob, Outcome, OutcomeReport};
use crate::name::SubscriptionId;

/// Durable, ordered collection of jobs partitioned by subscription.
///
/// `claim_oldest` and `report_outcome` must each be atomic with respect to
/// concurrent callers: a pending job is handed to at most one claimant, and
/// a report either applies fully or not at all.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Insert a new pending job, assigning its id and sequence.
    async fn insert(&self, job: NewJob) -> Result<Job>;

    async fn get(&self, id: JobId) -> Result<Job>;

    /// Claim the oldest pending job of a subscription for `claimant`.
    ///
    /// Returns `Ok(None)` when the subscription has no pending job.
    async fn claim_oldest(
        &self,
        subscription: &SubscriptionId,
        claimant: &str,
    ) -> Result<Option<Job>>;

    /// Move a claimed job into the outcome's terminal state.
    ///
    /// Re-reporting the outcome a job already has returns the job unchanged
    /// with `applied == false`.
    async fn report_outcome(
        &self,
        id: JobId,
        outcome: Outcome,
        error: Option<String>,
    ) -> Result<OutcomeReport>;

    /// Return every job claimed before `claimed_before` to `Pending`,
    /// keeping its original sequence.
    async fn reclaim_expired(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn pending_count(&self, subscription: &SubscriptionId) -> Result<i64>;

    /// List jobs of a subscription in sequence order.
    async fn list(
        &self,
        subscription: &SubscriptionId,
        state: Option<JobState>,
        limit: i64,
    ) -> Result<Vec<Job>>;

    /// Whether `claimant` currently holds a claimed job in the subscription.
    async fn has_claimed(&self, subscription: &SubscriptionId, claimant: &str) -> Result<bool>;

    /// Check that the backing datastore is reachable.
    async fn ping(&self) -> Result<()>;
}
