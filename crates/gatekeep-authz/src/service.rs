//! Authorization service: the public entry point for permission checks.
//!
//! Every check follows cache lookup → on miss, load catalog, role grants
//! and overrides concurrently → evaluate → fill → answer. Store failures
//! surface as [`GatekeepError::Unavailable`]; a decision is never
//! fabricated without the stores.

use std::sync::Arc;

use chrono::Utc;
use gatekeep_core::cache::DistributedCache;
use gatekeep_core::catalog::Catalog;
use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::status::StatusFilter;
use gatekeep_core::repository::{PermissionRepository, RoleRepository, UserPermissionRepository};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::PermissionCache;
use crate::config::AuthzConfig;
use crate::context::RequestContext;
use crate::engine::{
    self, DecisionReason, EffectivePermissions, EvaluationInput, EvaluationResult,
};
use crate::error::AuthzError;

/// The answer to an authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    pub user_id: Uuid,
    pub granted: bool,
    /// Permission names checked, in request order.
    pub checked: Vec<String>,
    pub reason: String,
    /// Checked permissions that were not granted.
    pub missing: Vec<String>,
    /// The user's effective permissions, sorted.
    pub effective_permissions: Vec<String>,
}

impl AuthorizationDecision {
    fn from_results(
        user_id: Uuid,
        results: Vec<EvaluationResult>,
        effective_permissions: Vec<String>,
        granted: bool,
        reason: String,
    ) -> Self {
        let missing = results
            .iter()
            .filter(|r| !r.is_granted())
            .map(|r| r.permission.clone())
            .collect();
        Self {
            user_id,
            granted,
            checked: results.into_iter().map(|r| r.permission).collect(),
            reason,
            missing,
            effective_permissions,
        }
    }

    fn single(user_id: Uuid, result: EvaluationResult, effective: &EffectivePermissions) -> Self {
        let granted = result.is_granted();
        let reason = result.reason.to_string();
        Self::from_results(user_id, vec![result], effective.names(), granted, reason)
    }

    fn user_inactive(user_id: Uuid, names: &[String]) -> Self {
        Self {
            user_id,
            granted: false,
            checked: names.to_vec(),
            reason: DecisionReason::UserInactive.to_string(),
            missing: names.to_vec(),
            effective_permissions: Vec::new(),
        }
    }
}

/// Authorization service.
///
/// Generic over repository implementations and the distributed cache
/// backend so that the authorization layer has no dependency on the
/// database crate.
pub struct AuthorizationService<P, R, O, D>
where
    P: PermissionRepository,
    R: RoleRepository,
    O: UserPermissionRepository,
    D: DistributedCache,
{
    permission_repo: P,
    role_repo: R,
    override_repo: O,
    cache: PermissionCache<D>,
    catalog: moka::future::Cache<(), Arc<Catalog>>,
}

impl<P, R, O, D> AuthorizationService<P, R, O, D>
where
    P: PermissionRepository,
    R: RoleRepository,
    O: UserPermissionRepository,
    D: DistributedCache,
{
    pub fn new(
        permission_repo: P,
        role_repo: R,
        override_repo: O,
        distributed: D,
        config: AuthzConfig,
    ) -> Self {
        let catalog = moka::future::Cache::builder()
            .max_capacity(1)
            .time_to_live(config.catalog_ttl())
            .build();
        Self {
            permission_repo,
            role_repo,
            override_repo,
            cache: PermissionCache::new(distributed, &config),
            catalog,
        }
    }

    pub fn cache(&self) -> &PermissionCache<D> {
        &self.cache
    }

    pub(crate) fn permission_repo(&self) -> &P {
        &self.permission_repo
    }

    pub(crate) fn role_repo(&self) -> &R {
        &self.role_repo
    }

    pub(crate) fn override_repo(&self) -> &O {
        &self.override_repo
    }

    /// Check a single permission.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        permission: &str,
    ) -> GatekeepResult<AuthorizationDecision> {
        ctx.validate()?;
        engine::validate_permission_name(permission)?;

        ctx.run(async {
            if !ctx.user_active {
                return Ok(AuthorizationDecision::user_inactive(
                    ctx.user_id,
                    &[permission.to_string()],
                ));
            }
            let (catalog, snapshot) = self.snapshot(ctx.user_id).await?;
            let result = engine::evaluate_cached(&catalog, &snapshot, permission);
            Ok(AuthorizationDecision::single(ctx.user_id, result, &snapshot))
        })
        .await
    }

    /// Granted when at least one of `permissions` is granted.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn authorize_any(
        &self,
        ctx: &RequestContext,
        permissions: &[String],
    ) -> GatekeepResult<AuthorizationDecision> {
        self.authorize_many(ctx, permissions, Quantifier::Any).await
    }

    /// Granted when every one of `permissions` is granted; `missing` lists
    /// the others.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn authorize_all(
        &self,
        ctx: &RequestContext,
        permissions: &[String],
    ) -> GatekeepResult<AuthorizationDecision> {
        self.authorize_many(ctx, permissions, Quantifier::All).await
    }

    /// One decision per permission, all answered from a single snapshot.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id, count = permissions.len()))]
    pub async fn bulk_authorize(
        &self,
        ctx: &RequestContext,
        permissions: &[String],
    ) -> GatekeepResult<Vec<AuthorizationDecision>> {
        ctx.validate()?;
        engine::validate_permission_names(permissions)?;

        ctx.run(async {
            if !ctx.user_active {
                return Ok(permissions
                    .iter()
                    .map(|p| AuthorizationDecision::user_inactive(ctx.user_id, &[p.clone()]))
                    .collect());
            }
            let (catalog, snapshot) = self.snapshot(ctx.user_id).await?;
            Ok(permissions
                .iter()
                .map(|p| {
                    let result = engine::evaluate_cached(&catalog, &snapshot, p);
                    AuthorizationDecision::single(ctx.user_id, result, &snapshot)
                })
                .collect())
        })
        .await
    }

    /// Sorted, deduplicated effective permission names.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn get_effective_permissions(
        &self,
        ctx: &RequestContext,
    ) -> GatekeepResult<Vec<String>> {
        ctx.validate()?;

        ctx.run(async {
            if !ctx.user_active {
                return Ok(Vec::new());
            }
            let snapshot = self.effective(ctx.user_id).await?;
            Ok(snapshot.names())
        })
        .await
    }

    /// Evaluate directly against the stores, bypassing every cache.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn explain(
        &self,
        ctx: &RequestContext,
        permission: &str,
    ) -> GatekeepResult<EvaluationResult> {
        ctx.validate()?;
        engine::validate_permission_name(permission)?;

        ctx.run(async {
            if !ctx.user_active {
                return Ok(EvaluationResult {
                    permission: permission.to_string(),
                    reason: DecisionReason::UserInactive,
                });
            }
            let (permissions, roles, overrides) = tokio::try_join!(
                self.permission_repo.list(StatusFilter::Any),
                self.role_repo.get_user_role_grants(ctx.user_id, StatusFilter::Any),
                self.override_repo.list_for_user(ctx.user_id),
            )
            .map_err(store_failure)?;
            let catalog = Catalog::new(permissions);
            let input = EvaluationInput {
                user_id: ctx.user_id,
                catalog: &catalog,
                roles: &roles,
                overrides: &overrides,
                now: Utc::now(),
            };
            Ok(engine::evaluate(&input, permission)?)
        })
        .await
    }

    pub async fn invalidate_user_cache(&self, user_id: Uuid) {
        self.cache.invalidate_user(user_id).await;
    }

    pub async fn invalidate_users_cache(&self, user_ids: &[Uuid]) {
        self.cache.invalidate_users(user_ids).await;
    }

    /// Invalidate every user holding `role_id`, found through the store's
    /// role → members index.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_role_cache(&self, role_id: Uuid) -> GatekeepResult<()> {
        let members = self
            .role_repo
            .get_role_members(role_id)
            .await
            .map_err(store_failure)?;
        debug!(members = members.len(), "invalidating role members");
        self.cache.invalidate_users(&members).await;
        Ok(())
    }

    pub async fn invalidate_all_cache(&self) {
        self.invalidate_catalog();
        self.cache.invalidate_all().await;
    }

    /// Drop the cached catalog so the next check reloads it.
    pub fn invalidate_catalog(&self) {
        self.catalog.invalidate_all();
    }

    async fn authorize_many(
        &self,
        ctx: &RequestContext,
        permissions: &[String],
        quantifier: Quantifier,
    ) -> GatekeepResult<AuthorizationDecision> {
        ctx.validate()?;
        engine::validate_permission_names(permissions)?;

        ctx.run(async {
            if !ctx.user_active {
                return Ok(AuthorizationDecision::user_inactive(ctx.user_id, permissions));
            }
            let (catalog, snapshot) = self.snapshot(ctx.user_id).await?;
            let results: Vec<EvaluationResult> = permissions
                .iter()
                .map(|p| engine::evaluate_cached(&catalog, &snapshot, p))
                .collect();
            let (granted, reason) = quantifier.conclude(&results);
            Ok(AuthorizationDecision::from_results(
                ctx.user_id,
                results,
                snapshot.names(),
                granted,
                reason,
            ))
        })
        .await
    }

    async fn snapshot(
        &self,
        user_id: Uuid,
    ) -> GatekeepResult<(Arc<Catalog>, Arc<EffectivePermissions>)> {
        tokio::try_join!(self.load_catalog(), self.effective(user_id))
    }

    async fn effective(&self, user_id: Uuid) -> GatekeepResult<Arc<EffectivePermissions>> {
        self.cache
            .get_or_fill(user_id, || self.compute(user_id))
            .await
    }

    async fn compute(&self, user_id: Uuid) -> GatekeepResult<EffectivePermissions> {
        let (catalog, roles, overrides) = tokio::try_join!(
            self.load_catalog(),
            async {
                self.role_repo
                    .get_user_role_grants(user_id, StatusFilter::Any)
                    .await
                    .map_err(store_failure)
            },
            async {
                self.override_repo
                    .list_for_user(user_id)
                    .await
                    .map_err(store_failure)
            },
        )?;
        Ok(engine::effective_permissions(&EvaluationInput {
            user_id,
            catalog: &catalog,
            roles: &roles,
            overrides: &overrides,
            now: Utc::now(),
        }))
    }

    async fn load_catalog(&self) -> GatekeepResult<Arc<Catalog>> {
        self.catalog
            .try_get_with((), async {
                let permissions = self.permission_repo.list(StatusFilter::Any).await?;
                debug!(count = permissions.len(), "permission catalog loaded");
                Ok::<_, GatekeepError>(Arc::new(Catalog::new(permissions)))
            })
            .await
            .map_err(|e| classify_store_failure(&e))
    }
}

#[derive(Debug, Clone, Copy)]
enum Quantifier {
    Any,
    All,
}

impl Quantifier {
    fn conclude(self, results: &[EvaluationResult]) -> (bool, String) {
        match self {
            Self::Any => match results.iter().find(|r| r.is_granted()) {
                Some(r) => (true, format!("{}: {}", r.permission, r.reason)),
                None => (false, "none of the requested permissions is granted".into()),
            },
            Self::All => match results.iter().find(|r| !r.is_granted()) {
                Some(r) => (false, format!("{}: {}", r.permission, r.reason)),
                None => (true, "all requested permissions granted".into()),
            },
        }
    }
}

/// Map a store read failure onto the generic, retryable unavailability
/// error. Request aborts pass through untouched.
fn store_failure(err: GatekeepError) -> GatekeepError {
    classify_store_failure(&err)
}

fn classify_store_failure(err: &GatekeepError) -> GatekeepError {
    match err {
        GatekeepError::Cancelled => GatekeepError::Cancelled,
        GatekeepError::DeadlineExceeded => GatekeepError::DeadlineExceeded,
        GatekeepError::Unavailable => GatekeepError::Unavailable,
        other => {
            warn!(error = %other, "permission store read failed");
            AuthzError::StoreUnavailable(other.to_string()).into()
        }
    }
}
