//! Job lifecycle events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::job::Job;
use crate::name::SubscriptionId;

/// A job lifecycle change worth announcing to real-time clients.
///
/// Events never carry the job payload; consumers still have to claim the
/// job to obtain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobAvailable {
        job_id: JobId,
        subscription_id: SubscriptionId,
    },
    JobCompleted {
        job_id: JobId,
        subscription_id: SubscriptionId,
    },
    JobFailed {
        job_id: JobId,
        subscription_id: SubscriptionId,
    },
    JobReclaimed {
        job_id: JobId,
        subscription_id: SubscriptionId,
    },
}

impl JobEvent {
    pub fn available(job: &Job) -> Self {
        JobEvent::JobAvailable {
            job_id: job.id,
            subscription_id: job.subscription_id.clone(),
        }
    }

    pub fn reclaimed(job: &Job) -> Self {
        JobEvent::JobReclaimed {
            job_id: job.id,
            subscription_id: job.subscription_id.clone(),
        }
    }

    /// Event for a job that has reached a terminal state, if it has.
    pub fn finished(job: &Job) -> Option<Self> {
        let job_id = job.id;
        let subscription_id = job.subscription_id.clone();
        match job.state {
            crate::JobState::Completed => Some(JobEvent::JobCompleted {
                job_id,
                subscription_id,
            }),
            crate::JobState::Failed => Some(JobEvent::JobFailed {
                job_id,
                subscription_id,
            }),
            _ => None,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobAvailable { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobReclaimed { job_id, .. } => *job_id,
        }
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        match self {
            JobEvent::JobAvailable {
                subscription_id, ..
            }
            | JobEvent::JobCompleted {
                subscription_id, ..
            }
            | JobEvent::JobFailed {
                subscription_id, ..
            }
            | JobEvent::JobReclaimed {
                subscription_id, ..
            } => subscription_id,
        }
    }
}

/// Receives job lifecycle events, typically to fan them out to clients.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    /// Announce an event. Returns how many recipients it was handed to.
    async fn notify(&self, event: &JobEvent) -> usize;
}
