//! Job model and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::id::JobId;
use crate::name::SubscriptionId;

/// State of a queued job.
///
/// Jobs only move forward: `Pending -> Claimed -> {Completed | Failed}`.
/// The reclaim sweep is the single exception and returns an expired
/// `Claimed` job to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Claimed => "claimed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the forward lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Claimed)
                | (JobState::Claimed, JobState::Completed)
                | (JobState::Claimed, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "claimed" => Ok(JobState::Claimed),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(Error::InvalidInput(format!("unknown job state: {}", other))),
        }
    }
}

/// Outcome reported by a consumer for a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    /// The terminal state this outcome moves a job into.
    pub fn target_state(&self) -> JobState {
        match self {
            Outcome::Completed => JobState::Completed,
            Outcome::Failed => JobState::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target_state().as_str())
    }
}

impl FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Outcome::Completed),
            "failed" => Ok(Outcome::Failed),
            other => Err(Error::InvalidInput(format!("unknown outcome: {}", other))),
        }
    }
}

/// A unit of work queued under a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub subscription_id: SubscriptionId,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Strictly increasing insertion counter. Pending jobs are served in
    /// ascending `sequence` order within a subscription.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of times the job has been claimed, including reclaimed attempts.
    pub attempts: i32,
    pub error: Option<String>,
}

impl Job {
    /// Decide how a report of `outcome` applies to this job.
    ///
    /// Returns `Ok(true)` when the job must transition, `Ok(false)` when the
    /// same outcome was already recorded (idempotent re-report).
    pub fn check_outcome(&self, outcome: Outcome) -> Result<bool, Error> {
        let target = outcome.target_state();
        if self.state == target {
            return Ok(false);
        }
        if self.state.can_transition_to(target) {
            return Ok(true);
        }
        Err(Error::InvalidTransition {
            job_id: self.id,
            from: self.state,
            to: target,
        })
    }
}

/// Result of reporting an outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    pub job: Job,
    /// `false` when the job already had this outcome and nothing changed.
    pub applied: bool,
}

/// A job about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub subscription_id: SubscriptionId,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn job_in(state: JobState) -> Job {
        Job {
            id: JobId::new(),
            subscription_id: "s1".parse().unwrap(),
            payload: serde_json::json!({}),
            state,
            sequence: 1,
            created_at: Utc::now(),
            claimed_by: None,
            claimed_at: None,
            finished_at: None,
            attempts: 0,
            error: None,
        }
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        assert!(JobState::Pending.can_transition_to(JobState::Claimed));
        assert!(JobState::Claimed.can_transition_to(JobState::Completed));
        assert!(JobState::Claimed.can_transition_to(JobState::Failed));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Claimed));
        assert!(!JobState::Failed.can_transition_to(JobState::Completed));
    }

    #[test]
    fn state_names_parse_back() {
        for state in [
            JobState::Pending,
            JobState::Claimed,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn claimed_job_accepts_either_outcome() {
        let job = job_in(JobState::Claimed);
        assert!(job.check_outcome(Outcome::Completed).unwrap());
        assert!(job.check_outcome(Outcome::Failed).unwrap());
    }

    #[test]
    fn same_outcome_twice_is_a_no_op() {
        let job = job_in(JobState::Completed);
        assert!(!job.check_outcome(Outcome::Completed).unwrap());
    }

    #[test]
    fn conflicting_outcome_is_rejected() {
        let job = job_in(JobState::Completed);
        assert_matches!(
            job.check_outcome(Outcome::Failed),
            Err(Error::InvalidTransition {
                from: JobState::Completed,
                to: JobState::Failed,
                ..
            })
        );
    }

    #[test]
    fn pending_job_cannot_be_reported() {
        let job = job_in(JobState::Pending);
        assert_matches!(
            job.check_outcome(Outcome::Completed),
            Err(Error::InvalidTransition { .. })
        );
    }
}
