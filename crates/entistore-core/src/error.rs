//! Error types for the entity store.
//!
//! "Not found" and "version conflict" are results, not errors: the store
//! reports them as `None`. Only validation and infrastructure faults
//! propagate through this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntistoreError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EntistoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type EntistoreResult<T> = Result<T, EntistoreError>;
