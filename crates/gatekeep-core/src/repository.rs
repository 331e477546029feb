//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Listing operations take an explicit
//! [`StatusFilter`]. Mutations that must be audited take the audit entry as
//! an argument and persist both in one transaction: an implementation must
//! never commit the mutation without its audit row.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::GatekeepResult;
use crate::models::{
    audit::{AuditAction, CreateAuditLogEntry, PermissionAuditLog},
    permission::{CreatePermission, Permission, UpdatePermission},
    role::{CreateRole, Role, RoleGrants, UpdateRole},
    status::StatusFilter,
    user_permission::UserPermission,
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Permission catalog
// ---------------------------------------------------------------------------

pub trait PermissionRepository: Send + Sync {
    fn create(
        &self,
        input: CreatePermission,
    ) -> impl Future<Output = GatekeepResult<Permission>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GatekeepResult<Permission>> + Send;
    fn get_by_name(
        &self,
        resource: &str,
        action: &str,
    ) -> impl Future<Output = GatekeepResult<Permission>> + Send;
    /// Update in place. Permissions are never deleted; set
    /// `status = Inactive` instead.
    fn update(
        &self,
        id: Uuid,
        input: UpdatePermission,
    ) -> impl Future<Output = GatekeepResult<Permission>> + Send;
    /// Load the catalog.
    fn list(
        &self,
        status: StatusFilter,
    ) -> impl Future<Output = GatekeepResult<Vec<Permission>>> + Send;
}

// ---------------------------------------------------------------------------
// Roles, role-permission links and user-role membership
// ---------------------------------------------------------------------------

pub trait RoleRepository: Send + Sync {
    fn create(&self, input: CreateRole) -> impl Future<Output = GatekeepResult<Role>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GatekeepResult<Role>> + Send;
    fn get_by_name(&self, name: &str) -> impl Future<Output = GatekeepResult<Role>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateRole,
    ) -> impl Future<Output = GatekeepResult<Role>> + Send;
    fn list(&self, status: StatusFilter)
    -> impl Future<Output = GatekeepResult<Vec<Role>>> + Send;

    /// Make a user a member of a role. Returns `false` if already a member.
    fn assign_to_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<bool>> + Send;

    /// Remove a membership. Returns `false` if the user was not a member.
    fn unassign_from_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<bool>> + Send;

    /// Roles a user is a member of.
    fn get_user_roles(
        &self,
        user_id: Uuid,
        status: StatusFilter,
    ) -> impl Future<Output = GatekeepResult<Vec<Role>>> + Send;

    /// Reverse index: ids of every user holding the role.
    fn get_role_members(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<Vec<Uuid>>> + Send;

    /// Roles a user is a member of, each with its linked permission ids.
    fn get_user_role_grants(
        &self,
        user_id: Uuid,
        status: StatusFilter,
    ) -> impl Future<Output = GatekeepResult<Vec<RoleGrants>>> + Send;

    /// Ids of the permissions linked to a role.
    fn get_role_permissions(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<Vec<Uuid>>> + Send;

    fn has_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<bool>> + Send;

    /// Link a permission to a role and append its audit row atomically.
    /// Fails if the link already exists.
    fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> impl Future<Output = GatekeepResult<PermissionAuditLog>> + Send;

    /// Unlink a permission from a role and append its audit row atomically.
    fn revoke_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> impl Future<Output = GatekeepResult<PermissionAuditLog>> + Send;
}

// ---------------------------------------------------------------------------
// User overrides
// ---------------------------------------------------------------------------

pub trait UserPermissionRepository: Send + Sync {
    fn get(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<Option<UserPermission>>> + Send;

    /// Every override stored for a user, expired ones included.
    fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = GatekeepResult<Vec<UserPermission>>> + Send;

    /// Overrides whose expiry is at or before `now`.
    fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = GatekeepResult<Vec<UserPermission>>> + Send;

    /// Create or replace the override for its `(user, permission)` pair and
    /// append its audit row atomically.
    fn upsert(
        &self,
        input: UserPermission,
        audit: CreateAuditLogEntry,
    ) -> impl Future<Output = GatekeepResult<PermissionAuditLog>> + Send;

    /// Delete the override for a pair and append its audit row atomically.
    fn remove(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> impl Future<Output = GatekeepResult<PermissionAuditLog>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only)
// ---------------------------------------------------------------------------

/// Query filters for audit log entries. `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub permission_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit log entry. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditLogEntry,
    ) -> impl Future<Output = GatekeepResult<PermissionAuditLog>> + Send;
    /// Matching entries, newest first.
    fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> impl Future<Output = GatekeepResult<PaginatedResult<PermissionAuditLog>>> + Send;
}
