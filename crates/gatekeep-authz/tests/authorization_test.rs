//! Integration tests for the authorization service against in-memory
//! SurrealDB.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatekeep_authz::{
    AuthorizationService, AuthzConfig, InMemoryDistributedCache, PermissionAdminService,
    RequestContext,
};
use gatekeep_core::cache::{CacheError, DistributedCache};
use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::audit::{AuditContext, CreateAuditLogEntry, PermissionAuditLog};
use gatekeep_core::models::permission::{CreatePermission, Permission, UpdatePermission};
use gatekeep_core::models::role::{CreateRole, Role, RoleGrants, UpdateRole};
use gatekeep_core::models::status::{EntityStatus, StatusFilter};
use gatekeep_core::models::user_permission::{SetUserPermission, UserPermission};
use gatekeep_core::repository::{PermissionRepository, RoleRepository, UserPermissionRepository};
use gatekeep_db::repository::{
    SurrealPermissionRepository, SurrealRoleRepository, SurrealUserPermissionRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Authz<P, O, D> = AuthorizationService<P, SurrealRoleRepository<Db>, O, D>;
type Service =
    Authz<SurrealPermissionRepository<Db>, SurrealUserPermissionRepository<Db>, InMemoryDistributedCache>;
type Admin = PermissionAdminService<
    SurrealPermissionRepository<Db>,
    SurrealRoleRepository<Db>,
    SurrealUserPermissionRepository<Db>,
    InMemoryDistributedCache,
>;

struct Fixture {
    db: Surreal<Db>,
    authz: Arc<Service>,
    admin: Admin,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    gatekeep_db::run_migrations(&db).await.unwrap();

    let authz = service(
        SurrealPermissionRepository::new(db.clone()),
        &db,
        SurrealUserPermissionRepository::new(db.clone()),
        InMemoryDistributedCache::new(),
    );
    let admin = PermissionAdminService::new(authz.clone());
    Fixture { db, authz, admin }
}

fn service<P, O, D>(permissions: P, db: &Surreal<Db>, overrides: O, cache: D) -> Arc<Authz<P, O, D>>
where
    P: PermissionRepository,
    O: UserPermissionRepository,
    D: DistributedCache,
{
    Arc::new(AuthorizationService::new(
        permissions,
        SurrealRoleRepository::new(db.clone()),
        overrides,
        cache,
        AuthzConfig::default(),
    ))
}

fn actor() -> AuditContext {
    AuditContext::new("admin").with_reason("integration test")
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn permission(admin: &Admin, resource: &str, action: &str) -> Permission {
    admin
        .create_permission(CreatePermission::new(resource, action))
        .await
        .unwrap()
}

/// Create a role linked to `permissions` and make `user_id` a member.
async fn role_for(admin: &Admin, user_id: Uuid, name: &str, permissions: &[Uuid]) -> Role {
    let role = admin
        .create_role(CreateRole {
            name: name.into(),
            description: format!("{name} role"),
        })
        .await
        .unwrap();
    if !permissions.is_empty() {
        admin
            .bulk_add_permissions_to_role(role.id, permissions, &actor())
            .await
            .unwrap();
    }
    admin.assign_role_to_user(user_id, role.id).await.unwrap();
    role
}

#[tokio::test]
async fn deny_override_beats_role_grant() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let write = permission(&fx.admin, "Docs", "Write").await;
    role_for(&fx.admin, user, "Editor", &[write.id]).await;
    let ctx = RequestContext::new(user);

    let decision = fx.authz.authorize(&ctx, "Docs.Write").await.unwrap();
    assert!(decision.granted);
    assert_eq!(decision.reason, "granted via role Editor");

    fx.admin
        .set_user_override(
            SetUserPermission::deny(user, write.id).with_reason("under investigation"),
            &actor(),
        )
        .await
        .unwrap();

    let decision = fx.authz.authorize(&ctx, "Docs.Write").await.unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.reason, "denied by user override");
    assert_eq!(decision.missing, names(&["Docs.Write"]));
    assert!(decision.effective_permissions.is_empty());
}

#[tokio::test]
async fn inactive_permission_is_never_granted() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let export = permission(&fx.admin, "Reports", "Export").await;
    role_for(&fx.admin, user, "Analyst", &[export.id]).await;
    let ctx = RequestContext::new(user);
    assert!(fx.authz.authorize(&ctx, "Reports.Export").await.unwrap().granted);

    fx.admin
        .update_permission(
            export.id,
            UpdatePermission {
                status: Some(EntityStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let decision = fx.authz.authorize(&ctx, "Reports.Export").await.unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.reason, "permission inactive");
}

#[tokio::test]
async fn unknown_permission_is_denied() {
    let fx = setup().await;
    let decision = fx
        .authz
        .authorize(&RequestContext::new(Uuid::new_v4()), "Nope.Read")
        .await
        .unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.reason, "permission unknown");
}

#[tokio::test]
async fn expiring_grant_lapses_without_invalidation() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let view = permission(&fx.admin, "Billing", "View").await;
    let expires_at: DateTime<Utc> = Utc::now() + chrono::Duration::milliseconds(400);
    fx.admin
        .set_user_override(
            SetUserPermission::grant(user, view.id).expiring_at(expires_at),
            &actor(),
        )
        .await
        .unwrap();
    let ctx = RequestContext::new(user);

    let decision = fx.authz.authorize(&ctx, "Billing.View").await.unwrap();
    assert!(decision.granted);
    assert_eq!(decision.reason, "granted by user override");

    tokio::time::sleep(Duration::from_millis(600)).await;

    let decision = fx.authz.authorize(&ctx, "Billing.View").await.unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.reason, "no role or override grants this permission");
}

#[tokio::test]
async fn role_link_change_reaches_cached_members() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    let role = role_for(&fx.admin, user, "Viewer", &[]).await;
    let ctx = RequestContext::new(user);

    assert!(!fx.authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);
    assert!(fx.authz.cache().get(user).await.is_some());

    fx.admin
        .add_permission_to_role(role.id, read.id, &actor())
        .await
        .unwrap();
    assert!(fx.authz.cache().get(user).await.is_none());
    assert!(fx.authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);

    fx.admin
        .remove_permission_from_role(role.id, read.id, &actor())
        .await
        .unwrap();
    assert!(!fx.authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);
}

#[tokio::test]
async fn inactive_role_stops_granting() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    let role = role_for(&fx.admin, user, "Viewer", &[read.id]).await;
    let ctx = RequestContext::new(user);
    assert!(fx.authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);

    fx.admin
        .update_role(
            role.id,
            UpdateRole {
                status: Some(EntityStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!fx.authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);
}

#[tokio::test]
async fn any_and_all_report_missing_permissions() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    permission(&fx.admin, "Docs", "Delete").await;
    role_for(&fx.admin, user, "Viewer", &[read.id]).await;
    let ctx = RequestContext::new(user);
    let requested = names(&["Docs.Delete", "Docs.Read"]);

    let any = fx.authz.authorize_any(&ctx, &requested).await.unwrap();
    assert!(any.granted);
    assert_eq!(any.reason, "Docs.Read: granted via role Viewer");
    assert_eq!(any.checked, requested);

    let all = fx.authz.authorize_all(&ctx, &requested).await.unwrap();
    assert!(!all.granted);
    assert_eq!(all.missing, names(&["Docs.Delete"]));
    assert_eq!(all.effective_permissions, names(&["Docs.Read"]));

    let none = fx
        .authz
        .authorize_any(&ctx, &names(&["Docs.Delete"]))
        .await
        .unwrap();
    assert!(!none.granted);
    assert_eq!(none.reason, "none of the requested permissions is granted");
}

#[tokio::test]
async fn bulk_and_effective_permissions_share_one_snapshot() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    let write = permission(&fx.admin, "Docs", "Write").await;
    let export = permission(&fx.admin, "Reports", "Export").await;
    role_for(&fx.admin, user, "Editor", &[write.id, read.id]).await;
    fx.admin
        .set_user_override(SetUserPermission::grant(user, export.id), &actor())
        .await
        .unwrap();
    let ctx = RequestContext::new(user);

    let effective = fx.authz.get_effective_permissions(&ctx).await.unwrap();
    assert_eq!(effective, names(&["Docs.Read", "Docs.Write", "Reports.Export"]));

    let decisions = fx
        .authz
        .bulk_authorize(&ctx, &names(&["Docs.Write", "Docs.Delete", "Reports.Export"]))
        .await
        .unwrap();
    let granted: Vec<bool> = decisions.iter().map(|d| d.granted).collect();
    assert_eq!(granted, [true, false, true]);
}

#[tokio::test]
async fn cached_decisions_agree_with_explain() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    let write = permission(&fx.admin, "Docs", "Write").await;
    let export = permission(&fx.admin, "Reports", "Export").await;
    let view = permission(&fx.admin, "Billing", "View").await;
    role_for(&fx.admin, user, "Editor", &[read.id, write.id, export.id]).await;
    fx.admin
        .set_user_override(SetUserPermission::deny(user, write.id), &actor())
        .await
        .unwrap();
    fx.admin
        .set_user_override(SetUserPermission::grant(user, view.id), &actor())
        .await
        .unwrap();
    fx.admin
        .update_permission(
            export.id,
            UpdatePermission {
                status: Some(EntityStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let ctx = RequestContext::new(user);

    for name in [
        "Docs.Read",
        "Docs.Write",
        "Reports.Export",
        "Billing.View",
        "Nope.Read",
    ] {
        let cached = fx.authz.authorize(&ctx, name).await.unwrap();
        let direct = fx.authz.explain(&ctx, name).await.unwrap();
        assert_eq!(cached.granted, direct.is_granted(), "{name}");
        assert_eq!(cached.reason, direct.reason.to_string(), "{name}");
    }
}

#[tokio::test]
async fn inactive_user_is_denied_without_lookup() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    role_for(&fx.admin, user, "Viewer", &[read.id]).await;
    let ctx = RequestContext::new(user).with_user_active(false);

    let decision = fx.authz.authorize(&ctx, "Docs.Read").await.unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.reason, "user inactive");
    assert!(fx.authz.get_effective_permissions(&ctx).await.unwrap().is_empty());
    assert!(fx.authz.cache().get(user).await.is_none());
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let fx = setup().await;

    let nil = RequestContext::new(Uuid::nil());
    assert!(matches!(
        fx.authz.authorize(&nil, "Docs.Read").await,
        Err(GatekeepError::Validation { .. })
    ));

    let ctx = RequestContext::new(Uuid::new_v4());
    for name in ["", "DocsRead", "Docs.Re ad"] {
        assert!(
            matches!(
                fx.authz.authorize(&ctx, name).await,
                Err(GatekeepError::Validation { .. })
            ),
            "{name:?}"
        );
    }
    assert!(matches!(
        fx.authz.authorize_any(&ctx, &names(&["Docs.Read", "Docs"])).await,
        Err(GatekeepError::Validation { .. })
    ));
    assert!(matches!(
        fx.authz.authorize_all(&ctx, &[]).await,
        Err(GatekeepError::Validation { .. })
    ));
}

#[tokio::test]
async fn cancelled_request_is_abandoned() {
    let fx = setup().await;
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RequestContext::new(Uuid::new_v4()).with_cancellation(token);

    assert!(matches!(
        fx.authz.authorize(&ctx, "Docs.Read").await,
        Err(GatekeepError::Cancelled)
    ));
}

// ---------------------------------------------------------------------------
// Single flight
// ---------------------------------------------------------------------------

/// Counts override loads and holds each one open long enough for
/// concurrent requests to pile up behind it.
struct CountingOverrides {
    inner: SurrealUserPermissionRepository<Db>,
    loads: Arc<AtomicUsize>,
}

impl UserPermissionRepository for CountingOverrides {
    async fn get(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
    ) -> GatekeepResult<Option<UserPermission>> {
        self.inner.get(user_id, permission_id).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> GatekeepResult<Vec<UserPermission>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.list_for_user(user_id).await
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> GatekeepResult<Vec<UserPermission>> {
        self.inner.list_expired(now).await
    }

    async fn upsert(
        &self,
        input: UserPermission,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        self.inner.upsert(input, audit).await
    }

    async fn remove(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        self.inner.remove(user_id, permission_id, audit).await
    }
}

#[tokio::test]
async fn concurrent_misses_load_once() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    role_for(&fx.admin, user, "Viewer", &[read.id]).await;

    let loads = Arc::new(AtomicUsize::new(0));
    let authz = service(
        SurrealPermissionRepository::new(fx.db.clone()),
        &fx.db,
        CountingOverrides {
            inner: SurrealUserPermissionRepository::new(fx.db.clone()),
            loads: loads.clone(),
        },
        InMemoryDistributedCache::new(),
    );

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let authz = authz.clone();
        tasks.push(tokio::spawn(async move {
            authz
                .authorize(&RequestContext::new(user), "Docs.Read")
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().granted);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Degraded dependencies
// ---------------------------------------------------------------------------

struct UnreachablePermissions;

fn refused<T>() -> GatekeepResult<T> {
    Err(GatekeepError::Database("connection refused".into()))
}

impl PermissionRepository for UnreachablePermissions {
    async fn create(&self, _input: CreatePermission) -> GatekeepResult<Permission> {
        refused()
    }

    async fn get_by_id(&self, _id: Uuid) -> GatekeepResult<Permission> {
        refused()
    }

    async fn get_by_name(&self, _resource: &str, _action: &str) -> GatekeepResult<Permission> {
        refused()
    }

    async fn update(&self, _id: Uuid, _input: UpdatePermission) -> GatekeepResult<Permission> {
        refused()
    }

    async fn list(&self, _status: StatusFilter) -> GatekeepResult<Vec<Permission>> {
        refused()
    }
}

#[tokio::test]
async fn store_outage_is_reported_not_guessed() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    role_for(&fx.admin, user, "Viewer", &[read.id]).await;

    let authz = service(
        UnreachablePermissions,
        &fx.db,
        SurrealUserPermissionRepository::new(fx.db.clone()),
        InMemoryDistributedCache::new(),
    );
    let ctx = RequestContext::new(user);

    assert!(matches!(
        authz.authorize(&ctx, "Docs.Read").await,
        Err(GatekeepError::Unavailable)
    ));
    assert!(matches!(
        authz.explain(&ctx, "Docs.Read").await,
        Err(GatekeepError::Unavailable)
    ));
    assert!(authz.cache().get(user).await.is_none());
}

/// Role store whose member reverse index is down; everything else works.
struct MemberlessRoles {
    inner: SurrealRoleRepository<Db>,
}

impl RoleRepository for MemberlessRoles {
    async fn create(&self, input: CreateRole) -> GatekeepResult<Role> {
        self.inner.create(input).await
    }

    async fn get_by_id(&self, id: Uuid) -> GatekeepResult<Role> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_name(&self, name: &str) -> GatekeepResult<Role> {
        self.inner.get_by_name(name).await
    }

    async fn update(&self, id: Uuid, input: UpdateRole) -> GatekeepResult<Role> {
        self.inner.update(id, input).await
    }

    async fn list(&self, status: StatusFilter) -> GatekeepResult<Vec<Role>> {
        self.inner.list(status).await
    }

    async fn assign_to_user(&self, user_id: Uuid, role_id: Uuid) -> GatekeepResult<bool> {
        self.inner.assign_to_user(user_id, role_id).await
    }

    async fn unassign_from_user(&self, user_id: Uuid, role_id: Uuid) -> GatekeepResult<bool> {
        self.inner.unassign_from_user(user_id, role_id).await
    }

    async fn get_user_roles(&self, user_id: Uuid, status: StatusFilter) -> GatekeepResult<Vec<Role>> {
        self.inner.get_user_roles(user_id, status).await
    }

    async fn get_role_members(&self, _role_id: Uuid) -> GatekeepResult<Vec<Uuid>> {
        refused()
    }

    async fn get_user_role_grants(
        &self,
        user_id: Uuid,
        status: StatusFilter,
    ) -> GatekeepResult<Vec<RoleGrants>> {
        self.inner.get_user_role_grants(user_id, status).await
    }

    async fn get_role_permissions(&self, role_id: Uuid) -> GatekeepResult<Vec<Uuid>> {
        self.inner.get_role_permissions(role_id).await
    }

    async fn has_permission(&self, role_id: Uuid, permission_id: Uuid) -> GatekeepResult<bool> {
        self.inner.has_permission(role_id, permission_id).await
    }

    async fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        self.inner.grant_permission(role_id, permission_id, audit).await
    }

    async fn revoke_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        self.inner.revoke_permission(role_id, permission_id, audit).await
    }
}

#[tokio::test]
async fn committed_link_survives_member_lookup_outage() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    let write = permission(&fx.admin, "Docs", "Write").await;
    let editor = role_for(&fx.admin, user, "Editor", &[read.id]).await;

    let authz = Arc::new(AuthorizationService::new(
        SurrealPermissionRepository::new(fx.db.clone()),
        MemberlessRoles {
            inner: SurrealRoleRepository::new(fx.db.clone()),
        },
        SurrealUserPermissionRepository::new(fx.db.clone()),
        InMemoryDistributedCache::new(),
        AuthzConfig::default(),
    ));
    let admin = PermissionAdminService::new(authz.clone());
    let ctx = RequestContext::new(user);

    assert!(!authz.authorize(&ctx, "Docs.Write").await.unwrap().granted);
    assert!(authz.cache().get(user).await.is_some());

    // The link commits; the member lookup fails, so the whole cache goes.
    let linked = admin
        .add_permission_to_role(editor.id, write.id, &actor())
        .await
        .unwrap();
    assert!(linked.is_applied());
    assert!(authz.cache().get(user).await.is_none());
    assert!(authz.authorize(&ctx, "Docs.Write").await.unwrap().granted);

    let unlinked = admin
        .remove_permission_from_role(editor.id, write.id, &actor())
        .await
        .unwrap();
    assert!(unlinked.is_applied());
    assert!(!authz.authorize(&ctx, "Docs.Write").await.unwrap().granted);

    let deactivated = admin
        .update_role(
            editor.id,
            UpdateRole {
                status: Some(EntityStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(deactivated.status, EntityStatus::Inactive);
    assert!(!authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);
}

struct UnreachableCache;

impl DistributedCache for UnreachableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Backend("connection reset".into()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection reset".into()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection reset".into()))
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection reset".into()))
    }
}

#[tokio::test]
async fn cache_outage_still_answers_correctly() {
    let fx = setup().await;
    let user = Uuid::new_v4();
    let read = permission(&fx.admin, "Docs", "Read").await;
    role_for(&fx.admin, user, "Viewer", &[read.id]).await;

    let authz = service(
        SurrealPermissionRepository::new(fx.db.clone()),
        &fx.db,
        SurrealUserPermissionRepository::new(fx.db.clone()),
        UnreachableCache,
    );
    let ctx = RequestContext::new(user);

    for _ in 0..2 {
        let decision = authz.authorize(&ctx, "Docs.Read").await.unwrap();
        assert!(decision.granted);
        assert!(!authz.authorize(&ctx, "Docs.Write").await.unwrap().granted);
    }
    authz.invalidate_user_cache(user).await;
    assert!(authz.authorize(&ctx, "Docs.Read").await.unwrap().granted);
}
