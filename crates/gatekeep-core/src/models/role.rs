//! Role domain model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatekeepError, GatekeepResult};
use crate::models::status::EntityStatus;

/// Maximum length of a role name.
pub const MAX_ROLE_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    pub description: String,
}

impl CreateRole {
    pub fn validate(&self) -> GatekeepResult<()> {
        validate_role_name(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<EntityStatus>,
}

impl UpdateRole {
    pub fn validate(&self) -> GatekeepResult<()> {
        match &self.name {
            Some(name) => validate_role_name(name),
            None => Ok(()),
        }
    }
}

/// A role together with the ids of the permissions it links to.
///
/// This is the shape the evaluation engine consumes; it is loaded per user
/// and is never cached on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleGrants {
    pub role: Role,
    pub permission_ids: BTreeSet<Uuid>,
}

impl RoleGrants {
    pub fn grants(&self, permission_id: Uuid) -> bool {
        self.permission_ids.contains(&permission_id)
    }
}

fn validate_role_name(name: &str) -> GatekeepResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GatekeepError::validation("role name must not be empty"));
    }
    if trimmed.len() != name.len() {
        return Err(GatekeepError::validation(
            "role name must not have leading or trailing whitespace",
        ));
    }
    if name.len() > MAX_ROLE_NAME_LEN {
        return Err(GatekeepError::validation(format!(
            "role name must be at most {MAX_ROLE_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_rules() {
        let ok = CreateRole {
            name: "Editor".into(),
            description: String::new(),
        };
        assert!(ok.validate().is_ok());

        for bad in ["", "   ", " Editor", &"r".repeat(MAX_ROLE_NAME_LEN + 1)] {
            let input = CreateRole {
                name: bad.to_string(),
                description: String::new(),
            };
            assert!(input.validate().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn update_without_name_is_valid() {
        assert!(UpdateRole::default().validate().is_ok());
    }
}
