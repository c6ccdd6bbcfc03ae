//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Whether the failure means the database could not be reached at all,
    /// as opposed to a query that reached it and failed.
    pub fn is_unavailable(&self) -> bool {
        match self {
            DbError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

impl From<DbError> for courier_core::Error {
    fn from(err: DbError) -> Self {
        if err.is_unavailable() {
            return courier_core::Error::StoreUnavailable(err.to_string());
        }
        match err {
            DbError::NotFound(msg) => courier_core::Error::NotFound(msg),
            other => courier_core::Error::Internal(other.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_unavailable() {
        let err: courier_core::Error = DbError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_row_is_not_found() {
        let err: courier_core::Error = DbError::NotFound("job x".into()).into();
        assert!(matches!(err, courier_core::Error::NotFound(_)));
    }

    #[test]
    fn row_not_found_from_driver_is_internal() {
        let err: courier_core::Error = DbError::Database(sqlx::Error::RowNotFound).into();
        assert!(matches!(err, courier_core::Error::Internal(_)));
    }
}
