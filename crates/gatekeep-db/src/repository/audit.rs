//! SurrealDB implementation of [`AuditLogRepository`].
//!
//! The audit table only accepts `CREATE`. Repositories that mutate
//! permission state splice [`APPEND_AUDIT`] into their own transaction via
//! [`audit_binding`] so the change and its audit row commit together.

use chrono::{DateTime, Utc};
use gatekeep_core::error::GatekeepResult;
use gatekeep_core::models::audit::{
    AuditAction, AuditSubject, CreateAuditLogEntry, PermissionAuditLog,
};
use gatekeep_core::repository::{
    AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination,
};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid, write_error};
use crate::error::DbError;

/// Statement appending one audit row from the `$audit` parameter bound by
/// [`audit_binding`].
pub(crate) const APPEND_AUDIT: &str = "\
    CREATE type::record('permission_audit_log', $audit.id) SET \
    user_id = $audit.user_id, role_id = $audit.role_id, \
    permission_id = $audit.permission_id, action = $audit.action, \
    old_value = $audit.old_value, new_value = $audit.new_value, \
    reason = $audit.reason, performed_by = $audit.performed_by, \
    performed_at = $audit.performed_at";

#[derive(Debug, SurrealValue)]
pub(crate) struct AuditRecord {
    id: String,
    user_id: Option<String>,
    role_id: Option<String>,
    permission_id: String,
    action: String,
    old_value: Option<String>,
    new_value: Option<String>,
    reason: Option<String>,
    performed_by: String,
    performed_at: DateTime<Utc>,
}

/// The `$audit` query parameter for [`APPEND_AUDIT`].
pub(crate) fn audit_binding(entry: &PermissionAuditLog) -> (&'static str, AuditRecord) {
    let record = AuditRecord {
        id: entry.id.to_string(),
        user_id: entry.subject.user_id().map(|id| id.to_string()),
        role_id: entry.subject.role_id().map(|id| id.to_string()),
        permission_id: entry.permission_id.to_string(),
        action: entry.action.as_str().to_string(),
        old_value: entry.old_value.clone(),
        new_value: entry.new_value.clone(),
        reason: entry.reason.clone(),
        performed_by: entry.performed_by.clone(),
        performed_at: entry.performed_at,
    };
    ("audit", record)
}

/// Validate an audit input and stamp it with a fresh id and write time.
pub(crate) fn stamp(input: CreateAuditLogEntry) -> GatekeepResult<PermissionAuditLog> {
    input.validate()?;
    Ok(input.into_entry(Uuid::new_v4(), Utc::now()))
}

#[derive(Debug, SurrealValue)]
struct AuditLogRow {
    record_id: String,
    user_id: Option<String>,
    role_id: Option<String>,
    permission_id: String,
    action: String,
    old_value: Option<String>,
    new_value: Option<String>,
    reason: Option<String>,
    performed_by: String,
    performed_at: DateTime<Utc>,
}

impl AuditLogRow {
    fn try_into_entry(self) -> Result<PermissionAuditLog, DbError> {
        let subject = match (self.user_id.as_deref(), self.role_id.as_deref()) {
            (Some(user_id), None) => AuditSubject::User(parse_uuid(user_id, "user")?),
            (None, Some(role_id)) => AuditSubject::Role(parse_uuid(role_id, "role")?),
            _ => {
                return Err(DbError::Decode(format!(
                    "audit entry {} must reference exactly one of user or role",
                    self.record_id
                )));
            }
        };
        let action = self
            .action
            .parse::<AuditAction>()
            .map_err(|e| DbError::Decode(e.to_string()))?;
        Ok(PermissionAuditLog {
            id: parse_uuid(&self.record_id, "audit")?,
            subject,
            permission_id: parse_uuid(&self.permission_id, "permission")?,
            action,
            old_value: self.old_value,
            new_value: self.new_value,
            reason: self.reason,
            performed_by: self.performed_by,
            performed_at: self.performed_at,
        })
    }
}

/// SurrealDB implementation of the permission audit log.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

fn filter_clause(filter: &AuditLogFilter) -> String {
    let mut conditions = Vec::new();
    if filter.user_id.is_some() {
        conditions.push("user_id = $user_id");
    }
    if filter.role_id.is_some() {
        conditions.push("role_id = $role_id");
    }
    if filter.permission_id.is_some() {
        conditions.push("permission_id = $permission_id");
    }
    if filter.action.is_some() {
        conditions.push("action = $action");
    }
    if filter.from.is_some() {
        conditions.push("performed_at >= $from");
    }
    if filter.to.is_some() {
        conditions.push("performed_at < $to");
    }
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditLogEntry) -> GatekeepResult<PermissionAuditLog> {
        let entry = stamp(input)?;

        self.db
            .query(APPEND_AUDIT)
            .bind(audit_binding(&entry))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "permission_audit_log"))?;

        Ok(entry)
    }

    async fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> GatekeepResult<PaginatedResult<PermissionAuditLog>> {
        let clause = filter_clause(&filter);

        let query = format!(
            "SELECT count() AS total FROM permission_audit_log{clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, user_id, role_id, permission_id, \
             action, old_value, new_value, reason, performed_by, performed_at \
             FROM permission_audit_log{clause} \
             ORDER BY performed_at DESC \
             LIMIT $limit START $offset"
        );
        let mut result = self
            .db
            .query(query)
            .bind(("user_id", filter.user_id.map(|id| id.to_string())))
            .bind(("role_id", filter.role_id.map(|id| id.to_string())))
            .bind(("permission_id", filter.permission_id.map(|id| id.to_string())))
            .bind(("action", filter.action.map(|a| a.as_str().to_string())))
            .bind(("from", filter.from))
            .bind(("to", filter.to))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let rows: Vec<AuditLogRow> = result.take(1).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(AuditLogRow::try_into_entry)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
