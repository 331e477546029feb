//! Error types for the Gatekeep system.
//!
//! Authorization denials are not errors: they are returned as data with a
//! reason string. Everything here is either a contract violation, a
//! dependency failure, or an aborted request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatekeepError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("authorization temporarily unavailable, retry later")]
    Unavailable,

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatekeepError {
    /// Shorthand for a [`GatekeepError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`GatekeepError::NotFound`].
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Unavailable | Self::DeadlineExceeded
        )
    }
}

pub type GatekeepResult<T> = Result<T, GatekeepError>;
