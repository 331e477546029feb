//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with ASSERT
//! constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "permission_engine",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — catalog, assignments, overrides, audit, shared cache
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Permission catalog (never deleted, deactivated via status)
-- =======================================================================
DEFINE TABLE permission SCHEMAFULL;
DEFINE FIELD resource ON TABLE permission TYPE string;
DEFINE FIELD action ON TABLE permission TYPE string;
DEFINE FIELD description ON TABLE permission TYPE string;
DEFINE FIELD category ON TABLE permission TYPE option<string>;
DEFINE FIELD status ON TABLE permission TYPE string \
    ASSERT $value IN ['Active', 'Inactive'];
DEFINE FIELD parent_permission_id ON TABLE permission TYPE option<string>;
DEFINE FIELD created_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_permission_resource_action ON TABLE permission \
    COLUMNS resource, action UNIQUE;
DEFINE INDEX idx_permission_parent ON TABLE permission \
    COLUMNS parent_permission_id;

-- =======================================================================
-- Roles
-- =======================================================================
DEFINE TABLE role SCHEMAFULL;
DEFINE FIELD name ON TABLE role TYPE string;
DEFINE FIELD description ON TABLE role TYPE string;
DEFINE FIELD status ON TABLE role TYPE string \
    ASSERT $value IN ['Active', 'Inactive'];
DEFINE FIELD created_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_name ON TABLE role COLUMNS name UNIQUE;

-- =======================================================================
-- Role -> Permission links (record id = [role_id, permission_id]).
-- idx_role_permission_role serves the role -> permissions lookup.
-- =======================================================================
DEFINE TABLE role_permission SCHEMAFULL;
DEFINE FIELD role_id ON TABLE role_permission TYPE string;
DEFINE FIELD permission_id ON TABLE role_permission TYPE string;
DEFINE FIELD created_at ON TABLE role_permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_permission_pair ON TABLE role_permission \
    COLUMNS role_id, permission_id UNIQUE;
DEFINE INDEX idx_role_permission_role ON TABLE role_permission \
    COLUMNS role_id;
DEFINE INDEX idx_role_permission_permission ON TABLE role_permission \
    COLUMNS permission_id;

-- =======================================================================
-- User -> Role membership (record id = [user_id, role_id]).
-- idx_user_role_role is the role -> members reverse index.
-- =======================================================================
DEFINE TABLE user_role SCHEMAFULL;
DEFINE FIELD user_id ON TABLE user_role TYPE string;
DEFINE FIELD role_id ON TABLE user_role TYPE string;
DEFINE FIELD created_at ON TABLE user_role TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_role_pair ON TABLE user_role \
    COLUMNS user_id, role_id UNIQUE;
DEFINE INDEX idx_user_role_role ON TABLE user_role COLUMNS role_id;

-- =======================================================================
-- User overrides (record id = [user_id, permission_id])
-- =======================================================================
DEFINE TABLE user_permission SCHEMAFULL;
DEFINE FIELD user_id ON TABLE user_permission TYPE string;
DEFINE FIELD permission_id ON TABLE user_permission TYPE string;
DEFINE FIELD state ON TABLE user_permission TYPE string \
    ASSERT $value IN ['Grant', 'Deny'];
DEFINE FIELD reason ON TABLE user_permission TYPE option<string>;
DEFINE FIELD expires_at ON TABLE user_permission TYPE option<datetime>;
DEFINE FIELD granted_by ON TABLE user_permission TYPE string;
DEFINE FIELD created_at ON TABLE user_permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE user_permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_permission_pair ON TABLE user_permission \
    COLUMNS user_id, permission_id UNIQUE;
DEFINE INDEX idx_user_permission_expiry ON TABLE user_permission \
    COLUMNS expires_at;

-- =======================================================================
-- Permission audit log (append-only)
-- =======================================================================
DEFINE TABLE permission_audit_log SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD user_id ON TABLE permission_audit_log TYPE option<string>;
DEFINE FIELD role_id ON TABLE permission_audit_log TYPE option<string>;
DEFINE FIELD permission_id ON TABLE permission_audit_log TYPE string;
DEFINE FIELD action ON TABLE permission_audit_log TYPE string \
    ASSERT $value IN ['Assigned', 'Removed', 'Modified'];
DEFINE FIELD old_value ON TABLE permission_audit_log TYPE option<string>;
DEFINE FIELD new_value ON TABLE permission_audit_log TYPE option<string>;
DEFINE FIELD reason ON TABLE permission_audit_log TYPE option<string>;
DEFINE FIELD performed_by ON TABLE permission_audit_log TYPE string;
DEFINE FIELD performed_at ON TABLE permission_audit_log TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_performed_at ON TABLE permission_audit_log \
    COLUMNS performed_at;
DEFINE INDEX idx_audit_user ON TABLE permission_audit_log \
    COLUMNS user_id, performed_at;
DEFINE INDEX idx_audit_role ON TABLE permission_audit_log \
    COLUMNS role_id, performed_at;
DEFINE INDEX idx_audit_permission ON TABLE permission_audit_log \
    COLUMNS permission_id, performed_at;

-- =======================================================================
-- Shared tier of the permission cache (expendable)
-- =======================================================================
DEFINE TABLE permission_cache SCHEMAFULL;
DEFINE FIELD cache_key ON TABLE permission_cache TYPE string;
DEFINE FIELD payload ON TABLE permission_cache TYPE string;
DEFINE FIELD expires_at ON TABLE permission_cache TYPE datetime;
DEFINE INDEX idx_permission_cache_key ON TABLE permission_cache \
    COLUMNS cache_key UNIQUE;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
