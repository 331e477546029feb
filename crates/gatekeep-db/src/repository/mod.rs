//! SurrealDB repository implementations.

mod audit;
mod cache;
mod permission;
mod role;
mod user_permission;

pub use audit::SurrealAuditLogRepository;
pub use cache::SurrealPermissionCache;
pub use permission::SurrealPermissionRepository;
pub use role::SurrealRoleRepository;
pub use user_permission::SurrealUserPermissionRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::Decode(format!("invalid {what} UUID {raw:?}: {e}")))
}

/// Classify a failed write. Unique index and record id collisions become
/// `AlreadyExists`; everything else is a query failure.
fn write_error(err: surrealdb::Error, entity: &str) -> DbError {
    let message = err.to_string();
    if message.contains("already exists") || message.contains("already contains") {
        DbError::AlreadyExists {
            entity: entity.into(),
        }
    } else {
        DbError::Query(message)
    }
}

/// Raised by [`guarded_delete`] when the target record is absent.
const NO_SUCH_RECORD: &str = "gatekeep: no such record";

/// Transaction statements that delete `target` or abort the transaction
/// when nothing was there to delete.
fn guarded_delete(target: &str) -> String {
    format!(
        "LET $removed = (DELETE {target} RETURN BEFORE); \
         IF array::len($removed) = 0 {{ THROW \"{NO_SUCH_RECORD}\" }};"
    )
}

/// Whether a failed transaction was aborted by [`guarded_delete`].
fn is_missing(err: &surrealdb::Error) -> bool {
    err.to_string().contains(NO_SUCH_RECORD)
}
