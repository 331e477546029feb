//! Permission evaluation engine.
//!
//! Pure functions over a loaded snapshot of the stores: the permission
//! catalog, the user's role grants and the user's overrides. Nothing here
//! performs I/O or takes a lock.
//!
//! Precedence, highest first:
//! 1. An unknown or inactive permission is denied, unconditionally.
//! 2. An active override is the final word: `Grant` allows, `Deny` blocks.
//! 3. Any active role linked to the permission grants it.
//!
//! The permission hierarchy is not consulted: granting a parent implies
//! nothing about its children, and vice versa.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use gatekeep_core::catalog::Catalog;
use gatekeep_core::models::permission::{Permission, PermissionName};
use gatekeep_core::models::role::RoleGrants;
use gatekeep_core::models::user_permission::{OverrideState, UserPermission};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthzError;

/// Why a permission was granted or denied. `Display` yields the stable,
/// caller-facing reason string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    PermissionUnknown,
    PermissionInactive,
    GrantedByOverride,
    DeniedByOverride,
    GrantedViaRole(String),
    NotGranted,
    UserInactive,
}

impl DecisionReason {
    pub fn is_grant(&self) -> bool {
        matches!(self, Self::GrantedByOverride | Self::GrantedViaRole(_))
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionUnknown => f.write_str("permission unknown"),
            Self::PermissionInactive => f.write_str("permission inactive"),
            Self::GrantedByOverride => f.write_str("granted by user override"),
            Self::DeniedByOverride => f.write_str("denied by user override"),
            Self::GrantedViaRole(role) => write!(f, "granted via role {role}"),
            Self::NotGranted => f.write_str("no role or override grants this permission"),
            Self::UserInactive => f.write_str("user inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub permission: String,
    pub reason: DecisionReason,
}

impl EvaluationResult {
    pub fn is_granted(&self) -> bool {
        self.reason.is_grant()
    }
}

/// Where a permission in an effective set came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantSource {
    /// The first active role, by name, linked to the permission.
    Role(String),
    Override,
}

/// Everything the engine needs to decide for one user.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub user_id: Uuid,
    pub catalog: &'a Catalog,
    /// Every role the user holds, active or not.
    pub roles: &'a [RoleGrants],
    /// Every override stored for the user, expired ones included.
    pub overrides: &'a [UserPermission],
    pub now: DateTime<Utc>,
}

impl EvaluationInput<'_> {
    fn active_override(&self, permission_id: Uuid) -> Option<&UserPermission> {
        self.overrides
            .iter()
            .filter(|o| o.permission_id == permission_id && o.is_active_at(self.now))
            .max_by_key(|o| o.updated_at)
    }

    fn granting_role(&self, permission_id: Uuid) -> Option<&RoleGrants> {
        self.roles
            .iter()
            .filter(|grants| grants.role.is_active() && grants.grants(permission_id))
            .min_by(|a, b| a.role.name.cmp(&b.role.name))
    }
}

/// A user's effective permissions at `computed_at`.
///
/// This is what the cache stores. Besides the granted names it keeps the
/// grant source of each name and the names blocked by a `Deny` override, so
/// that decisions served from it carry the same reasons as a direct
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissions {
    user_id: Uuid,
    granted: BTreeMap<String, GrantSource>,
    denied_by_override: BTreeSet<String>,
    role_ids: BTreeSet<Uuid>,
    computed_at: DateTime<Utc>,
    /// Earliest future override expiry; the snapshot is stale from then on.
    valid_until: Option<DateTime<Utc>>,
}

impl EffectivePermissions {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Granted permission names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.granted.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.granted.contains_key(name)
    }

    pub fn source(&self, name: &str) -> Option<&GrantSource> {
        self.granted.get(name)
    }

    pub fn is_denied_by_override(&self, name: &str) -> bool {
        self.denied_by_override.contains(name)
    }

    pub fn holds_role(&self, role_id: Uuid) -> bool {
        self.role_ids.contains(&role_id)
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|at| at <= now)
    }
}

/// Reject names that could never be in the catalog. Well-formed names that
/// are simply unknown are left for evaluation to deny.
pub fn validate_permission_name(name: &str) -> Result<(), AuthzError> {
    if name.trim().is_empty() {
        return Err(AuthzError::EmptyPermissionName);
    }
    PermissionName::parse(name)
        .map(drop)
        .map_err(|e| AuthzError::MalformedPermissionName {
            name: name.to_string(),
            message: e.to_string(),
        })
}

pub fn validate_permission_names<S: AsRef<str>>(names: &[S]) -> Result<(), AuthzError> {
    if names.is_empty() {
        return Err(AuthzError::EmptyPermissionList);
    }
    names
        .iter()
        .try_for_each(|name| validate_permission_name(name.as_ref()))
}

fn resolve<'c>(catalog: &'c Catalog, name: &str) -> Result<&'c Permission, DecisionReason> {
    match catalog.get_by_name(name) {
        None => Err(DecisionReason::PermissionUnknown),
        Some(permission) if !permission.is_active() => Err(DecisionReason::PermissionInactive),
        Some(permission) => Ok(permission),
    }
}

/// Decide a single permission for the user in `input`.
pub fn evaluate(
    input: &EvaluationInput<'_>,
    permission_name: &str,
) -> Result<EvaluationResult, AuthzError> {
    validate_permission_name(permission_name)?;

    let reason = match resolve(input.catalog, permission_name) {
        Err(reason) => reason,
        Ok(permission) => match input.active_override(permission.id) {
            Some(o) if o.state == OverrideState::Grant => DecisionReason::GrantedByOverride,
            Some(_) => DecisionReason::DeniedByOverride,
            None => match input.granting_role(permission.id) {
                Some(grants) => DecisionReason::GrantedViaRole(grants.role.name.clone()),
                None => DecisionReason::NotGranted,
            },
        },
    };

    Ok(EvaluationResult {
        permission: permission_name.to_string(),
        reason,
    })
}

pub fn has_any<S: AsRef<str>>(input: &EvaluationInput<'_>, names: &[S]) -> Result<bool, AuthzError> {
    validate_permission_names(names)?;
    for name in names {
        if evaluate(input, name.as_ref())?.is_granted() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn has_all<S: AsRef<str>>(input: &EvaluationInput<'_>, names: &[S]) -> Result<bool, AuthzError> {
    validate_permission_names(names)?;
    for name in names {
        if !evaluate(input, name.as_ref())?.is_granted() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Compute the full effective set: the union of the active roles' active
/// permissions, then every active override applied on top. Overrides naming
/// unknown or inactive permissions are ignored, so the set is exactly the
/// names [`evaluate`] grants.
pub fn effective_permissions(input: &EvaluationInput<'_>) -> EffectivePermissions {
    let mut granted = BTreeMap::new();
    let mut denied_by_override = BTreeSet::new();

    let mut active_roles: Vec<&RoleGrants> =
        input.roles.iter().filter(|g| g.role.is_active()).collect();
    active_roles.sort_by(|a, b| a.role.name.cmp(&b.role.name));

    for grants in active_roles {
        for permission_id in &grants.permission_ids {
            if let Some(permission) = input.catalog.get(*permission_id)
                && permission.is_active()
            {
                granted
                    .entry(permission.name())
                    .or_insert_with(|| GrantSource::Role(grants.role.name.clone()));
            }
        }
    }

    let mut permission_ids: Vec<Uuid> = input.overrides.iter().map(|o| o.permission_id).collect();
    permission_ids.sort_unstable();
    permission_ids.dedup();

    for permission_id in permission_ids {
        let Some(permission) = input.catalog.get(permission_id) else {
            continue;
        };
        if !permission.is_active() {
            continue;
        }
        let Some(active) = input.active_override(permission_id) else {
            continue;
        };
        let name = permission.name();
        match active.state {
            OverrideState::Grant => {
                granted.insert(name, GrantSource::Override);
            }
            OverrideState::Deny => {
                granted.remove(&name);
                denied_by_override.insert(name);
            }
        }
    }

    let valid_until = input
        .overrides
        .iter()
        .filter_map(|o| o.expires_at)
        .filter(|at| *at > input.now)
        .min();

    EffectivePermissions {
        user_id: input.user_id,
        granted,
        denied_by_override,
        role_ids: input.roles.iter().map(|g| g.role.id).collect(),
        computed_at: input.now,
        valid_until,
    }
}

/// Decide a single permission from a previously computed snapshot.
///
/// Agrees with [`evaluate`] on the inputs the snapshot was computed from:
/// name resolution goes through `catalog`, everything else through the
/// snapshot.
pub fn evaluate_cached(
    catalog: &Catalog,
    snapshot: &EffectivePermissions,
    permission_name: &str,
) -> EvaluationResult {
    let reason = match resolve(catalog, permission_name) {
        Err(reason) => reason,
        Ok(_) => match snapshot.source(permission_name) {
            Some(GrantSource::Override) => DecisionReason::GrantedByOverride,
            Some(GrantSource::Role(role)) => DecisionReason::GrantedViaRole(role.clone()),
            None if snapshot.is_denied_by_override(permission_name) => {
                DecisionReason::DeniedByOverride
            }
            None => DecisionReason::NotGranted,
        },
    };

    EvaluationResult {
        permission: permission_name.to_string(),
        reason,
    }
}
