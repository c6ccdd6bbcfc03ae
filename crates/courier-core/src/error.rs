//! Error types for Courier.

use thiserror::Error;

use crate::id::JobId;
use crate::job::JobState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    /// The claimant still holds a claimed job and may not take another.
    #[error("claimant busy: {0}")]
    ClaimantBusy(String),

    /// The backing datastore could not be reached. Callers may retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is transient and the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
