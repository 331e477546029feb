//! Per-user permission overrides.
//!
//! An override is the final word for its `(user, permission)` pair: a
//! `Deny` blocks access even when every role grants the permission, a
//! `Grant` allows it even when no role does.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatekeepError, GatekeepResult};

/// Maximum length of a free-text reason.
pub const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OverrideState {
    Grant,
    Deny,
}

impl OverrideState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grant => "Grant",
            Self::Deny => "Deny",
        }
    }

    /// Value written into audit snapshots.
    pub fn audit_value(self) -> &'static str {
        match self {
            Self::Grant => "Granted",
            Self::Deny => "Denied",
        }
    }
}

impl fmt::Display for OverrideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideState {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Grant" => Ok(Self::Grant),
            "Deny" => Ok(Self::Deny),
            other => Err(GatekeepError::validation(format!(
                "unknown override state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPermission {
    pub user_id: Uuid,
    pub permission_id: Uuid,
    pub state: OverrideState,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Actor that last wrote this override.
    pub granted_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPermission {
    /// No expiry, or expiry strictly after `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_active_at(now)
    }

    /// Before/after value recorded in the audit log.
    pub fn audit_snapshot(&self) -> String {
        audit_snapshot(self.state, self.expires_at)
    }
}

/// Input for creating or replacing the override of a `(user, permission)`
/// pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetUserPermission {
    pub user_id: Uuid,
    pub permission_id: Uuid,
    pub state: OverrideState,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SetUserPermission {
    pub fn grant(user_id: Uuid, permission_id: Uuid) -> Self {
        Self {
            user_id,
            permission_id,
            state: OverrideState::Grant,
            reason: None,
            expires_at: None,
        }
    }

    pub fn deny(user_id: Uuid, permission_id: Uuid) -> Self {
        Self {
            state: OverrideState::Deny,
            ..Self::grant(user_id, permission_id)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Reject malformed overrides: nil ids, an expiry that is not strictly
    /// in the future, or an over-long reason.
    pub fn validate(&self, now: DateTime<Utc>) -> GatekeepResult<()> {
        if self.user_id.is_nil() {
            return Err(GatekeepError::validation("user id must not be nil"));
        }
        if self.permission_id.is_nil() {
            return Err(GatekeepError::validation("permission id must not be nil"));
        }
        if let Some(expires_at) = self.expires_at
            && expires_at <= now
        {
            return Err(GatekeepError::validation(
                "override expiration must be in the future",
            ));
        }
        validate_reason(self.reason.as_deref())
    }

    pub fn audit_snapshot(&self) -> String {
        audit_snapshot(self.state, self.expires_at)
    }
}

pub fn validate_reason(reason: Option<&str>) -> GatekeepResult<()> {
    match reason {
        Some(r) if r.chars().count() > MAX_REASON_LEN => Err(GatekeepError::validation(
            format!("reason must be at most {MAX_REASON_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

fn audit_snapshot(state: OverrideState, expires_at: Option<DateTime<Utc>>) -> String {
    match expires_at {
        Some(at) => format!(
            "{} until {}",
            state.audit_value(),
            at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => state.audit_value().to_string(),
    }
}
