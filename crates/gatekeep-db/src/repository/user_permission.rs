//! SurrealDB implementation of [`UserPermissionRepository`].

use chrono::{DateTime, Utc};
use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::audit::{CreateAuditLogEntry, PermissionAuditLog};
use gatekeep_core::models::user_permission::{OverrideState, UserPermission};
use gatekeep_core::repository::UserPermissionRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::audit::{APPEND_AUDIT, audit_binding, stamp};
use super::{guarded_delete, is_missing, parse_uuid, write_error};
use crate::error::DbError;

const OVERRIDE_FIELDS: &str = "user_id, permission_id, state, reason, expires_at, \
    granted_by, created_at, updated_at";

#[derive(Debug, SurrealValue)]
struct UserPermissionRow {
    user_id: String,
    permission_id: String,
    state: String,
    reason: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    granted_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserPermissionRow {
    fn try_into_override(self) -> Result<UserPermission, DbError> {
        let state = self
            .state
            .parse::<OverrideState>()
            .map_err(|e| DbError::Decode(e.to_string()))?;
        Ok(UserPermission {
            user_id: parse_uuid(&self.user_id, "user")?,
            permission_id: parse_uuid(&self.permission_id, "permission")?,
            state,
            reason: self.reason,
            expires_at: self.expires_at,
            granted_by: self.granted_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_overrides(rows: Vec<UserPermissionRow>) -> Result<Vec<UserPermission>, DbError> {
    rows.into_iter()
        .map(UserPermissionRow::try_into_override)
        .collect()
}

/// SurrealDB implementation of per-user permission overrides.
#[derive(Clone)]
pub struct SurrealUserPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUserPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> UserPermissionRepository for SurrealUserPermissionRepository<C> {
    async fn get(&self, user_id: Uuid, permission_id: Uuid) -> GatekeepResult<Option<UserPermission>> {
        let query = format!(
            "SELECT {OVERRIDE_FIELDS} FROM \
             type::record('user_permission', [$user_id, $permission_id])"
        );
        let mut result = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserPermissionRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_override()?)),
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> GatekeepResult<Vec<UserPermission>> {
        let query = format!(
            "SELECT {OVERRIDE_FIELDS} FROM user_permission \
             WHERE user_id = $user_id ORDER BY permission_id"
        );
        let mut result = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserPermissionRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_overrides(rows)?)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> GatekeepResult<Vec<UserPermission>> {
        let query = format!(
            "SELECT {OVERRIDE_FIELDS} FROM user_permission \
             WHERE expires_at != NONE AND expires_at <= $now \
             ORDER BY expires_at"
        );
        let mut result = self
            .db
            .query(query)
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserPermissionRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_overrides(rows)?)
    }

    async fn upsert(
        &self,
        input: UserPermission,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        let entry = stamp(audit)?;

        let query = format!(
            "BEGIN TRANSACTION; \
             UPSERT type::record('user_permission', [$user_id, $permission_id]) SET \
             user_id = $user_id, permission_id = $permission_id, state = $state, \
             reason = $reason, expires_at = $expires_at, granted_by = $granted_by, \
             created_at = $created_at, updated_at = $updated_at; \
             {APPEND_AUDIT}; \
             COMMIT TRANSACTION;"
        );
        self.db
            .query(query)
            .bind(("user_id", input.user_id.to_string()))
            .bind(("permission_id", input.permission_id.to_string()))
            .bind(("state", input.state.as_str().to_string()))
            .bind(("reason", input.reason))
            .bind(("expires_at", input.expires_at))
            .bind(("granted_by", input.granted_by))
            .bind(("created_at", input.created_at))
            .bind(("updated_at", input.updated_at))
            .bind(audit_binding(&entry))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "user_permission"))?;

        Ok(entry)
    }

    async fn remove(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        let entry = stamp(audit)?;

        let query = format!(
            "BEGIN TRANSACTION; \
             {delete} \
             {APPEND_AUDIT}; \
             COMMIT TRANSACTION;",
            delete = guarded_delete("type::record('user_permission', [$user_id, $permission_id])"),
        );
        let outcome = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .bind(audit_binding(&entry))
            .await
            .map_err(DbError::from)?
            .check();

        let Err(e) = outcome else {
            return Ok(entry);
        };
        if is_missing(&e) || self.get(user_id, permission_id).await?.is_none() {
            return Err(GatekeepError::not_found(
                "user_permission",
                format!("{user_id}/{permission_id}"),
            ));
        }
        Err(write_error(e, "user_permission").into())
    }
}
