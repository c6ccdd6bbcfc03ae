//! PostgreSQL job store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so that concurrent consumers of the
//! same subscription never receive the same job, across any number of
//! service instances sharing the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    Job, JobId, JobState, JobStore, NewJob, Outcome, OutcomeReport, SubscriptionId,
};
use sqlx::PgPool;
use tracing::debug;

use crate::{DbError, DbResult};

const COLUMNS: &str = "id, subscription_id, payload, state, seq, created_at, \
                       claimed_by, claimed_at, finished_at, attempts, error";

/// Attempts at applying a report before giving up on a row that keeps changing.
const REPORT_ATTEMPTS: usize = 3;

/// A job row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRecord {
    id: uuid::Uuid,
    subscription_id: String,
    payload: serde_json::Value,
    state: String,
    seq: i64,
    created_at: DateTime<Utc>,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    attempts: i32,
    error: Option<String>,
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(record: JobRecord) -> DbResult<Self> {
        let state = record
            .state
            .parse::<JobState>()
            .map_err(|e| DbError::CorruptRow(format!("job {}: {}", record.id, e)))?;
        let subscription_id = record
            .subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| DbError::CorruptRow(format!("job {}: {}", record.id, e)))?;
        Ok(Job {
            id: record.id.into(),
            subscription_id,
            payload: record.payload,
            state,
            sequence: record.seq,
            created_at: record.created_at,
            claimed_by: record.claimed_by,
            claimed_at: record.claimed_at,
            finished_at: record.finished_at,
            attempts: record.attempts,
            error: record.error,
        })
    }
}

fn into_job(record: JobRecord) -> courier_core::Result<Job> {
    Ok(Job::try_from(record)?)
}

fn store_error(err: sqlx::Error) -> courier_core::Error {
    DbError::from(err).into()
}

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: JobId) -> courier_core::Result<Job> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let record = sqlx::query_as::<_, JobRecord>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        into_job(record)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, job: NewJob) -> courier_core::Result<Job> {
        let query = format!(
            "INSERT INTO jobs (id, subscription_id, payload, state, created_at) \
             VALUES ($1, $2, $3, 'pending', NOW()) \
             RETURNING {COLUMNS}"
        );
        let record = sqlx::query_as::<_, JobRecord>(&query)
            .bind(JobId::new().as_uuid())
            .bind(job.subscription_id.as_str())
            .bind(&job.payload)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        into_job(record)
    }

    async fn get(&self, id: JobId) -> courier_core::Result<Job> {
        self.fetch(id).await
    }

    async fn claim_oldest(
        &self,
        subscription: &SubscriptionId,
        claimant: &str,
    ) -> courier_core::Result<Option<Job>> {
        let query = format!(
            "UPDATE jobs \
             SET state = 'claimed', claimed_by = $2, claimed_at = NOW(), attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE subscription_id = $1 AND state = 'pending' \
                 ORDER BY seq ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let record = sqlx::query_as::<_, JobRecord>(&query)
            .bind(subscription.as_str())
            .bind(claimant)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        record.map(into_job).transpose()
    }

    async fn report_outcome(
        &self,
        id: JobId,
        outcome: Outcome,
        error: Option<String>,
    ) -> courier_core::Result<OutcomeReport> {
        let query = format!(
            "UPDATE jobs \
             SET state = $2, finished_at = NOW(), error = $3 \
             WHERE id = $1 AND state = 'claimed' \
             RETURNING {COLUMNS}"
        );

        for _ in 0..REPORT_ATTEMPTS {
            let updated = sqlx::query_as::<_, JobRecord>(&query)
                .bind(id.as_uuid())
                .bind(outcome.target_state().as_str())
                .bind(error.as_deref())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;
            if let Some(record) = updated {
                return Ok(OutcomeReport {
                    job: into_job(record)?,
                    applied: true,
                });
            }

            // Nothing changed: decide between an idempotent re-report and an
            // invalid transition from the row as it is now.
            let current = self.fetch(id).await?;
            if !current.check_outcome(outcome)? {
                return Ok(OutcomeReport {
                    job: current,
                    applied: false,
                });
            }
            debug!(job_id = %id, "Job became claimed again during report, retrying");
        }

        Err(courier_core::Error::Internal(format!(
            "job {} kept changing while reporting {}",
            id, outcome
        )))
    }

    async fn reclaim_expired(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> courier_core::Result<Vec<Job>> {
        let query = format!(
            "UPDATE jobs \
             SET state = 'pending', claimed_by = NULL, claimed_at = NULL \
             WHERE state = 'claimed' AND claimed_at < $1 \
             RETURNING {COLUMNS}"
        );
        let records = sqlx::query_as::<_, JobRecord>(&query)
            .bind(claimed_before)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        records.into_iter().map(into_job).collect()
    }

    async fn pending_count(&self, subscription: &SubscriptionId) -> courier_core::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE subscription_id = $1 AND state = 'pending'",
        )
        .bind(subscription.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(count)
    }

    async fn list(
        &self,
        subscription: &SubscriptionId,
        state: Option<JobState>,
        limit: i64,
    ) -> courier_core::Result<Vec<Job>> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE subscription_id = $1 AND ($2::TEXT IS NULL OR state = $2) \
             ORDER BY seq ASC \
             LIMIT $3"
        );
        let records = sqlx::query_as::<_, JobRecord>(&query)
            .bind(subscription.as_str())
            .bind(state.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        records.into_iter().map(into_job).collect()
    }

    async fn has_claimed(
        &self,
        subscription: &SubscriptionId,
        claimant: &str,
    ) -> courier_core::Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
                 SELECT 1 FROM jobs \
                 WHERE subscription_id = $1 AND claimed_by = $2 AND state = 'claimed' \
             )",
        )
        .bind(subscription.as_str())
        .bind(claimant)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(exists)
    }

    async fn ping(&self) -> courier_core::Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
