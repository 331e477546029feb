//! Permission administration: every mutation of the catalog, roles, role
//! links and user overrides.
//!
//! Each operation runs validate → read previous state → write (with its
//! audit row, in one transaction, where audited) → invalidate. Cache
//! invalidation is only ever issued after the write has committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use gatekeep_core::cache::DistributedCache;
use gatekeep_core::catalog::Catalog;
use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::audit::{AuditAction, AuditContext, AuditSubject, PermissionAuditLog};
use gatekeep_core::models::permission::{CreatePermission, Permission, UpdatePermission};
use gatekeep_core::models::role::{CreateRole, Role, UpdateRole};
use gatekeep_core::models::status::StatusFilter;
use gatekeep_core::models::user_permission::{SetUserPermission, UserPermission};
use gatekeep_core::repository::{PermissionRepository, RoleRepository, UserPermissionRepository};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthzError;
use crate::service::AuthorizationService;

/// Audit snapshot of a role-permission link.
const LINKED: &str = "Granted";

/// Reason recorded when the sweep removes an expired override.
pub const EXPIRED_REASON: &str = "expired";

/// Result of an idempotent link or unlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The link changed; this is its audit row.
    Applied(PermissionAuditLog),
    /// Nothing to do. No audit row was written.
    Unchanged,
}

impl LinkOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

pub struct PermissionAdminService<P, R, O, D>
where
    P: PermissionRepository,
    R: RoleRepository,
    O: UserPermissionRepository,
    D: DistributedCache,
{
    authz: Arc<AuthorizationService<P, R, O, D>>,
}

impl<P, R, O, D> PermissionAdminService<P, R, O, D>
where
    P: PermissionRepository,
    R: RoleRepository,
    O: UserPermissionRepository,
    D: DistributedCache,
{
    pub fn new(authz: Arc<AuthorizationService<P, R, O, D>>) -> Self {
        Self { authz }
    }

    fn permissions(&self) -> &P {
        self.authz.permission_repo()
    }

    fn roles(&self) -> &R {
        self.authz.role_repo()
    }

    fn overrides(&self) -> &O {
        self.authz.override_repo()
    }

    // -------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------

    #[tracing::instrument(skip(self, input), fields(permission = %input.name()))]
    pub async fn create_permission(&self, input: CreatePermission) -> GatekeepResult<Permission> {
        input.validate()?;
        if let Some(parent_id) = input.parent_permission_id {
            self.permissions().get_by_id(parent_id).await?;
        }

        let permission = self.permissions().create(input).await?;
        self.authz.invalidate_catalog();
        info!(permission_id = %permission.id, "permission created");
        Ok(permission)
    }

    /// Update a permission in place. A status flip invalidates every cached
    /// user, since any of them may hold it.
    #[tracing::instrument(skip(self, input))]
    pub async fn update_permission(
        &self,
        id: Uuid,
        input: UpdatePermission,
    ) -> GatekeepResult<Permission> {
        let current = self.permissions().get_by_id(id).await?;

        if let Some(Some(parent_id)) = input.parent_permission_id {
            let catalog = Catalog::new(self.permissions().list(StatusFilter::Any).await?);
            let parent = catalog
                .get(parent_id)
                .ok_or_else(|| GatekeepError::not_found("permission", parent_id))?;
            if !catalog.can_have_parent(id, parent_id) {
                return Err(AuthzError::ParentCycle {
                    permission: current.name(),
                    candidate: parent.name(),
                }
                .into());
            }
        }

        let updated = self.permissions().update(id, input).await?;
        self.authz.invalidate_catalog();
        if updated.status != current.status {
            info!(permission_id = %id, status = %updated.status, "permission status changed");
            self.authz.invalidate_all_cache().await;
        }
        Ok(updated)
    }

    // -------------------------------------------------------------------
    // Roles and membership
    // -------------------------------------------------------------------

    #[tracing::instrument(skip(self, input), fields(role = %input.name))]
    pub async fn create_role(&self, input: CreateRole) -> GatekeepResult<Role> {
        input.validate()?;
        let role = self.roles().create(input).await?;
        info!(role_id = %role.id, "role created");
        Ok(role)
    }

    /// Update a role. A status flip invalidates every member.
    #[tracing::instrument(skip(self, input))]
    pub async fn update_role(&self, id: Uuid, input: UpdateRole) -> GatekeepResult<Role> {
        input.validate()?;
        let current = self.roles().get_by_id(id).await?;
        let updated = self.roles().update(id, input).await?;
        if updated.status != current.status {
            info!(role_id = %id, status = %updated.status, "role status changed");
            self.invalidate_role_members(id).await;
        }
        Ok(updated)
    }

    /// Returns `false` when the user already held the role.
    #[tracing::instrument(skip(self))]
    pub async fn assign_role_to_user(&self, user_id: Uuid, role_id: Uuid) -> GatekeepResult<bool> {
        if user_id.is_nil() {
            return Err(AuthzError::NilUser.into());
        }
        self.roles().get_by_id(role_id).await?;

        let changed = self.roles().assign_to_user(user_id, role_id).await?;
        if changed {
            info!("role assigned");
            self.authz.invalidate_user_cache(user_id).await;
        }
        Ok(changed)
    }

    /// Returns `false` when the user did not hold the role.
    #[tracing::instrument(skip(self))]
    pub async fn unassign_role_from_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
    ) -> GatekeepResult<bool> {
        if user_id.is_nil() {
            return Err(AuthzError::NilUser.into());
        }

        let changed = self.roles().unassign_from_user(user_id, role_id).await?;
        if changed {
            info!("role unassigned");
            self.authz.invalidate_user_cache(user_id).await;
        }
        Ok(changed)
    }

    // -------------------------------------------------------------------
    // Role-permission links (audited)
    // -------------------------------------------------------------------

    #[tracing::instrument(skip(self, ctx), fields(performed_by = %ctx.performed_by))]
    pub async fn add_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        ctx: &AuditContext,
    ) -> GatekeepResult<LinkOutcome> {
        ctx.validate()?;
        self.roles().get_by_id(role_id).await?;
        self.permissions().get_by_id(permission_id).await?;

        let outcome = self.link(role_id, permission_id, ctx).await?;
        if outcome.is_applied() {
            info!("permission added to role");
            self.invalidate_role_members(role_id).await;
        }
        Ok(outcome)
    }

    /// Link several permissions, one transaction and one audit row per newly
    /// linked permission. Members are invalidated once, after the last link.
    #[tracing::instrument(skip(self, permission_ids, ctx), fields(count = permission_ids.len(), performed_by = %ctx.performed_by))]
    pub async fn bulk_add_permissions_to_role(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
        ctx: &AuditContext,
    ) -> GatekeepResult<Vec<LinkOutcome>> {
        ctx.validate()?;
        if permission_ids.is_empty() {
            return Err(AuthzError::EmptyPermissionList.into());
        }
        self.roles().get_by_id(role_id).await?;
        for permission_id in permission_ids.iter().collect::<BTreeSet<_>>() {
            self.permissions().get_by_id(*permission_id).await?;
        }

        let mut outcomes = Vec::with_capacity(permission_ids.len());
        let mut failure = None;
        for permission_id in permission_ids {
            match self.link(role_id, *permission_id, ctx).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let applied = outcomes.iter().filter(|o| o.is_applied()).count();
        if applied > 0 {
            info!(applied, "permissions added to role");
            self.invalidate_role_members(role_id).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(performed_by = %ctx.performed_by))]
    pub async fn remove_permission_from_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        ctx: &AuditContext,
    ) -> GatekeepResult<LinkOutcome> {
        ctx.validate()?;
        if !self.roles().has_permission(role_id, permission_id).await? {
            return Ok(LinkOutcome::Unchanged);
        }

        let entry = ctx.entry(
            AuditSubject::Role(role_id),
            permission_id,
            AuditAction::Removed,
            Some(LINKED.into()),
            None,
        );
        let outcome = match self
            .roles()
            .revoke_permission(role_id, permission_id, entry)
            .await
        {
            Ok(entry) => LinkOutcome::Applied(entry),
            Err(GatekeepError::NotFound { .. }) => LinkOutcome::Unchanged,
            Err(e) => return Err(e),
        };

        if outcome.is_applied() {
            info!("permission removed from role");
            self.invalidate_role_members(role_id).await;
        }
        Ok(outcome)
    }

    /// Evict every member of a role after a committed change. A failed
    /// member lookup flushes the whole cache rather than failing the call.
    async fn invalidate_role_members(&self, role_id: Uuid) {
        if let Err(e) = self.authz.invalidate_role_cache(role_id).await {
            warn!(%role_id, error = %e, "role member lookup failed, flushing permission cache");
            self.authz.invalidate_all_cache().await;
        }
    }

    async fn link(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        ctx: &AuditContext,
    ) -> GatekeepResult<LinkOutcome> {
        if self.roles().has_permission(role_id, permission_id).await? {
            return Ok(LinkOutcome::Unchanged);
        }

        let entry = ctx.entry(
            AuditSubject::Role(role_id),
            permission_id,
            AuditAction::Assigned,
            None,
            Some(LINKED.into()),
        );
        match self
            .roles()
            .grant_permission(role_id, permission_id, entry)
            .await
        {
            Ok(entry) => Ok(LinkOutcome::Applied(entry)),
            // A concurrent writer linked it first and recorded its own row.
            Err(GatekeepError::AlreadyExists { .. }) => Ok(LinkOutcome::Unchanged),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------
    // User overrides (audited)
    // -------------------------------------------------------------------

    /// Create or replace the override for a `(user, permission)` pair.
    /// Recorded as `Assigned` for a new pair and `Modified` otherwise.
    #[tracing::instrument(skip(self, input, ctx), fields(user_id = %input.user_id, permission_id = %input.permission_id, state = %input.state))]
    pub async fn set_user_override(
        &self,
        input: SetUserPermission,
        ctx: &AuditContext,
    ) -> GatekeepResult<PermissionAuditLog> {
        let now = Utc::now();
        input.validate(now)?;
        ctx.validate()?;
        self.permissions().get_by_id(input.permission_id).await?;

        let previous = self
            .overrides()
            .get(input.user_id, input.permission_id)
            .await?;
        let (action, old_value) = match &previous {
            Some(previous) => (AuditAction::Modified, Some(previous.audit_snapshot())),
            None => (AuditAction::Assigned, None),
        };

        let mut entry = ctx.entry(
            AuditSubject::User(input.user_id),
            input.permission_id,
            action,
            old_value,
            Some(input.audit_snapshot()),
        );
        if entry.reason.is_none() {
            entry.reason = input.reason.clone();
        }

        let user_id = input.user_id;
        let row = UserPermission {
            user_id,
            permission_id: input.permission_id,
            state: input.state,
            reason: input.reason,
            expires_at: input.expires_at,
            granted_by: ctx.performed_by.clone(),
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        let entry = self.overrides().upsert(row, entry).await?;

        info!(action = %entry.action, "user override written");
        self.authz.invalidate_user_cache(user_id).await;
        Ok(entry)
    }

    /// Remove the override for a pair. `None` when there was nothing to
    /// remove; no audit row is written in that case.
    #[tracing::instrument(skip(self, ctx), fields(performed_by = %ctx.performed_by))]
    pub async fn remove_user_override(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        ctx: &AuditContext,
    ) -> GatekeepResult<Option<PermissionAuditLog>> {
        ctx.validate()?;
        let Some(previous) = self.overrides().get(user_id, permission_id).await? else {
            return Ok(None);
        };

        let entry = self.remove_override(&previous, ctx).await?;
        if entry.is_some() {
            info!("user override removed");
            self.authz.invalidate_user_cache(user_id).await;
        }
        Ok(entry)
    }

    /// Delete every override whose expiry has passed, recording one
    /// `Removed` row per override. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired_overrides(&self, performed_by: &str) -> GatekeepResult<usize> {
        let ctx = AuditContext::new(performed_by).with_reason(EXPIRED_REASON);
        ctx.validate()?;

        let expired = self.overrides().list_expired(Utc::now()).await?;
        let mut users = BTreeSet::new();
        let mut removed = 0;
        let mut failure = None;
        for previous in &expired {
            match self.remove_override(previous, &ctx).await {
                Ok(Some(_)) => {
                    removed += 1;
                    users.insert(previous.user_id);
                }
                Ok(None) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Whatever committed before a failure must still be invalidated.
        let users: Vec<Uuid> = users.into_iter().collect();
        self.authz.invalidate_users_cache(&users).await;

        if let Some(e) = failure {
            return Err(e);
        }
        info!(removed, users = users.len(), "expired overrides swept");
        Ok(removed)
    }

    async fn remove_override(
        &self,
        previous: &UserPermission,
        ctx: &AuditContext,
    ) -> GatekeepResult<Option<PermissionAuditLog>> {
        let entry = ctx.entry(
            AuditSubject::User(previous.user_id),
            previous.permission_id,
            AuditAction::Removed,
            Some(previous.audit_snapshot()),
            None,
        );
        match self
            .overrides()
            .remove(previous.user_id, previous.permission_id, entry)
            .await
        {
            Ok(entry) => Ok(Some(entry)),
            Err(GatekeepError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
