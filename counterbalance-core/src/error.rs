//! Error types for assignment operations

use thiserror::Error;

/// Errors raised while allocating, completing or reaping assignments.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignmentError {
    /// Caller supplied something unusable. Rejected before any lock is taken.
    #[error("Invalid value for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// The store could not be reached. Retryable.
    #[error("Store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Assignment {id} is already completed")]
    AlreadyCompleted { id: String },

    /// Fatal at startup.
    #[error("Configuration error for {field}: {reason}")]
    Configuration { field: String, reason: String },

    /// The store reached an inconsistent or unexpected state.
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}

impl AssignmentError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn already_completed(id: impl ToString) -> Self {
        Self::AlreadyCompleted { id: id.to_string() }
    }

    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AssignmentError::StoreUnavailable { .. })
    }
}

/// Result type for assignment operations.
pub type AssignmentResult<T> = Result<T, AssignmentError>;
