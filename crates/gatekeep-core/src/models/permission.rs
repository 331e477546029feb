//! Permission domain model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatekeepError, GatekeepResult};
use crate::models::status::EntityStatus;

/// Maximum length of a resource or action identifier.
pub const MAX_IDENTIFIER_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: Uuid,
    /// The resource this permission protects (e.g., `Docs`).
    pub resource: String,
    /// The action allowed on the resource (e.g., `Write`).
    pub action: String,
    pub description: String,
    pub category: Option<String>,
    pub status: EntityStatus,
    /// Navigational parent. Not consulted during evaluation.
    pub parent_permission_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Canonical `"{resource}.{action}"` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.resource, self.action)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermission {
    pub resource: String,
    pub action: String,
    pub description: String,
    pub category: Option<String>,
    pub parent_permission_id: Option<Uuid>,
}

impl CreatePermission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            description: String::new(),
            category: None,
            parent_permission_id: None,
        }
    }

    /// Check the identifier rules for resource and action.
    pub fn validate(&self) -> GatekeepResult<()> {
        validate_identifier("resource", &self.resource)?;
        validate_identifier("action", &self.action)
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.resource, self.action)
    }
}

/// In-place update. Resource and action are fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePermission {
    pub description: Option<String>,
    /// `Some(Some(val))` = set, `Some(None)` = clear, `None` = no change.
    pub category: Option<Option<String>>,
    /// `Some(Some(id))` = re-parent, `Some(None)` = detach, `None` = no change.
    pub parent_permission_id: Option<Option<Uuid>>,
    pub status: Option<EntityStatus>,
}

/// A parsed `"{resource}.{action}"` permission name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionName {
    pub resource: String,
    pub action: String,
}

impl PermissionName {
    pub fn parse(name: &str) -> GatekeepResult<Self> {
        let (resource, action) = name.rsplit_once('.').ok_or_else(|| {
            GatekeepError::validation(format!(
                "permission name must have the form Resource.Action: {name}"
            ))
        })?;
        validate_identifier("resource", resource)?;
        validate_identifier("action", action)?;
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

impl FromStr for PermissionName {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier-safe: ASCII letters, digits, `_` and `-`; 1 to
/// [`MAX_IDENTIFIER_LEN`] characters.
pub fn validate_identifier(field: &str, value: &str) -> GatekeepResult<()> {
    if value.is_empty() {
        return Err(GatekeepError::validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(GatekeepError::validation(format!(
            "{field} must be at most {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(GatekeepError::validation(format!(
            "{field} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}
