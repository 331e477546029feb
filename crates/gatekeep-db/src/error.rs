//! Database-specific error types and conversions.

use gatekeep_core::cache::CacheError;
use gatekeep_core::error::GatekeepError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Record already exists: {entity}")]
    AlreadyExists { entity: String },
}

impl From<DbError> for GatekeepError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => GatekeepError::NotFound { entity, id },
            DbError::AlreadyExists { entity } => GatekeepError::AlreadyExists { entity },
            other => GatekeepError::Database(other.to_string()),
        }
    }
}

impl From<DbError> for CacheError {
    fn from(err: DbError) -> Self {
        CacheError::Backend(err.to_string())
    }
}
