//! Error taxonomy shared by every repository and service.
//!
//! Repositories translate driver errors into these variants and never retry.
//! Services decide what to retry; only [`StoreError::Transient`] qualifies.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Primary-key lookup returned no row.
    #[error("not found: {0}")]
    NotFound(String),
    /// Uniqueness violation. Never retried automatically.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Caller supplied a value outside the contract.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Connection reset, deadlock or serialization failure.
    #[error("transient: {0}")]
    Transient(String),
    /// The request context was cancelled or its deadline elapsed.
    #[error("cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        StoreError::NotFound(what.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::Invalid(msg.into())
    }

    /// Only transient failures may be retried, and only by idempotent callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => StoreError::NotFound("record not found".to_string()),
            DieselError::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => StoreError::Conflict(message),
                    DatabaseErrorKind::SerializationFailure
                    | DatabaseErrorKind::ClosedConnection => StoreError::Transient(message),
                    DatabaseErrorKind::CheckViolation
                    | DatabaseErrorKind::ForeignKeyViolation
                    | DatabaseErrorKind::NotNullViolation => StoreError::Invalid(message),
                    // SQLSTATE 40P01 has no dedicated kind
                    _ if message.contains("deadlock detected") => StoreError::Transient(message),
                    _ => StoreError::Internal(message),
                }
            }
            DieselError::BrokenTransactionManager => {
                StoreError::Transient("transaction manager is broken".to_string())
            }
            other => StoreError::Internal(other.to_string()),
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::Transient(format!("connection pool: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Invalid(format!("malformed json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Info(&'static str);

    impl diesel::result::DatabaseErrorInformation for Info {
        fn message(&self) -> &str {
            self.0
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            None
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            None
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn db_error(kind: DatabaseErrorKind, msg: &'static str) -> DieselError {
        DieselError::DatabaseError(kind, Box::new(Info(msg)))
    }

    #[test]
    fn unique_violation_is_conflict() {
        let err: StoreError = db_error(DatabaseErrorKind::UniqueViolation, "dup key").into();
        assert!(matches!(err, StoreError::Conflict(ref m) if m == "dup key"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn serialization_failure_is_retryable() {
        let err: StoreError =
            db_error(DatabaseErrorKind::SerializationFailure, "could not serialize").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn deadlock_is_transient() {
        let err: StoreError = db_error(DatabaseErrorKind::Unknown, "deadlock detected").into();
        assert!(matches!(err, StoreError::Transient(_)));
    }

    #[test]
    fn missing_row_is_not_found() {
        let err: StoreError = DieselError::NotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn check_violation_is_invalid() {
        let err: StoreError = db_error(DatabaseErrorKind::CheckViolation, "origin").into();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
}
