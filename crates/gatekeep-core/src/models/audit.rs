//! Permission audit log domain model.
//!
//! Entries are append-only. There is no update or delete input type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatekeepError, GatekeepResult};
use crate::models::user_permission::validate_reason;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Assigned,
    Removed,
    Modified,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "Assigned",
            Self::Removed => "Removed",
            Self::Modified => "Modified",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Assigned" => Ok(Self::Assigned),
            "Removed" => Ok(Self::Removed),
            "Modified" => Ok(Self::Modified),
            other => Err(GatekeepError::validation(format!(
                "unknown audit action: {other}"
            ))),
        }
    }
}

/// The dimension that changed: a user's override or a role's link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuditSubject {
    User(Uuid),
    Role(Uuid),
}

impl AuditSubject {
    pub fn user_id(self) -> Option<Uuid> {
        match self {
            Self::User(id) => Some(id),
            Self::Role(_) => None,
        }
    }

    pub fn role_id(self) -> Option<Uuid> {
        match self {
            Self::Role(id) => Some(id),
            Self::User(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionAuditLog {
    pub id: Uuid,
    pub subject: AuditSubject,
    pub permission_id: Uuid,
    pub action: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateAuditLogEntry {
    pub subject: AuditSubject,
    pub permission_id: Uuid,
    pub action: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub performed_by: String,
}

impl CreateAuditLogEntry {
    pub fn validate(&self) -> GatekeepResult<()> {
        if self.performed_by.trim().is_empty() {
            return Err(GatekeepError::validation("performed_by must not be empty"));
        }
        validate_reason(self.reason.as_deref())
    }

    /// Stamp the entry with its id and server write time.
    pub fn into_entry(self, id: Uuid, performed_at: DateTime<Utc>) -> PermissionAuditLog {
        PermissionAuditLog {
            id,
            subject: self.subject,
            permission_id: self.permission_id,
            action: self.action,
            old_value: self.old_value,
            new_value: self.new_value,
            reason: self.reason,
            performed_by: self.performed_by,
            performed_at,
        }
    }
}

/// Actor identity and optional justification attached to every audited
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditContext {
    pub performed_by: String,
    pub reason: Option<String>,
}

impl AuditContext {
    pub fn new(performed_by: impl Into<String>) -> Self {
        Self {
            performed_by: performed_by.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn validate(&self) -> GatekeepResult<()> {
        if self.performed_by.trim().is_empty() {
            return Err(GatekeepError::validation("performed_by must not be empty"));
        }
        validate_reason(self.reason.as_deref())
    }

    /// Build the audit row for a mutation performed under this context.
    pub fn entry(
        &self,
        subject: AuditSubject,
        permission_id: Uuid,
        action: AuditAction,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> CreateAuditLogEntry {
        CreateAuditLogEntry {
            subject,
            permission_id,
            action,
            old_value,
            new_value,
            reason: self.reason.clone(),
            performed_by: self.performed_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_carries_exactly_one_dimension() {
        let id = Uuid::new_v4();
        assert_eq!(AuditSubject::User(id).user_id(), Some(id));
        assert_eq!(AuditSubject::User(id).role_id(), None);
        assert_eq!(AuditSubject::Role(id).role_id(), Some(id));
        assert_eq!(AuditSubject::Role(id).user_id(), None);
    }

    #[test]
    fn context_builds_entries() {
        let ctx = AuditContext::new("alice").with_reason("quarterly review");
        let perm = Uuid::new_v4();
        let role = Uuid::new_v4();
        let entry = ctx.entry(
            AuditSubject::Role(role),
            perm,
            AuditAction::Assigned,
            None,
            Some("Granted".into()),
        );
        assert_eq!(entry.performed_by, "alice");
        assert_eq!(entry.reason.as_deref(), Some("quarterly review"));
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn context_requires_actor() {
        assert!(AuditContext::new("  ").validate().is_err());
        assert!(
            AuditContext::new("bob")
                .with_reason("r".repeat(501))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn action_parses() {
        for action in [AuditAction::Assigned, AuditAction::Removed, AuditAction::Modified] {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
    }
}
