//! Database-specific error types and conversions.

use std::time::Duration;

use entistore_core::error::EntistoreError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Schema bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Write rejected by schema: {0}")]
    Rejected(String),

    #[error("Write lost a transaction conflict: {0}")]
    WriteConflict(String),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Malformed row: {0}")]
    Decode(String),

    #[error("Storage not connected within {0:?}")]
    NotReady(Duration),
}

impl DbError {
    /// Classifies a statement-level failure reported by `Response::check`.
    pub(crate) fn from_statement(err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if is_conflict_message(&message) {
            Self::WriteConflict(message)
        } else {
            Self::Rejected(message)
        }
    }

    /// Whether the failure is a retryable transaction conflict between
    /// concurrent writers.
    pub fn is_write_conflict(&self) -> bool {
        match self {
            Self::WriteConflict(_) => true,
            Self::Surreal(err) => is_conflict_message(&err.to_string()),
            _ => false,
        }
    }
}

fn is_conflict_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("can be retried") || message.contains("conflict")
}

impl From<DbError> for EntistoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Rejected(message) => EntistoreError::Validation { message },
            other => EntistoreError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_writes_are_validation_errors() {
        let err: EntistoreError = DbError::Rejected("name is required".into()).into();
        assert!(err.is_validation());
    }

    #[test]
    fn other_failures_are_storage_errors() {
        let err: EntistoreError = DbError::Decode("bad id".into()).into();
        assert!(matches!(err, EntistoreError::Storage(_)));
    }

    #[test]
    fn conflict_detection() {
        assert!(DbError::WriteConflict("x".into()).is_write_conflict());
        assert!(is_conflict_message(
            "Failed to commit transaction due to a read or write conflict. \
             This transaction can be retried"
        ));
        assert!(!is_conflict_message("Found 'x' for field `version`"));
        assert!(!DbError::Rejected("conflict".into()).is_write_conflict());
    }
}
