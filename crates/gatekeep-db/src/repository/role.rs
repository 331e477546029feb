//! SurrealDB implementation of [`RoleRepository`].
//!
//! Memberships live in `user_role` and links in `role_permission`. Both use
//! array record ids (`[user_id, role_id]`, `[role_id, permission_id]`), so
//! a pair can exist at most once.

use chrono::{DateTime, Utc};
use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::audit::{CreateAuditLogEntry, PermissionAuditLog};
use gatekeep_core::models::role::{CreateRole, Role, RoleGrants, UpdateRole};
use gatekeep_core::models::status::{EntityStatus, StatusFilter};
use gatekeep_core::repository::RoleRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::audit::{APPEND_AUDIT, audit_binding, stamp};
use super::{guarded_delete, is_missing, parse_uuid, write_error};
use crate::error::DbError;

const ROLE_FIELDS: &str =
    "meta::id(id) AS record_id, name, description, status, created_at, updated_at";

#[derive(Debug, SurrealValue)]
struct RoleRow {
    record_id: String,
    name: String,
    description: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn try_into_role(self) -> Result<Role, DbError> {
        let status = self
            .status
            .parse::<EntityStatus>()
            .map_err(|e| DbError::Decode(e.to_string()))?;
        Ok(Role {
            id: parse_uuid(&self.record_id, "role")?,
            name: self.name,
            description: self.description,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_ids(raw: Vec<String>, what: &str) -> Result<Vec<Uuid>, DbError> {
    raw.iter().map(|id| parse_uuid(id, what)).collect()
}

/// SurrealDB implementation of the Role repository.
#[derive(Clone)]
pub struct SurrealRoleRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealRoleRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_by_name(&self, name: &str) -> GatekeepResult<Option<Role>> {
        let query = format!("SELECT {ROLE_FIELDS} FROM role WHERE name = $name");
        let mut result = self
            .db
            .query(query)
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_role()?)),
            None => Ok(None),
        }
    }

    async fn is_member(&self, user_id: Uuid, role_id: Uuid) -> GatekeepResult<bool> {
        let mut result = self
            .db
            .query("SELECT VALUE role_id FROM type::record('user_role', [$user_id, $role_id])")
            .bind(("user_id", user_id.to_string()))
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }
}

impl<C: Connection> RoleRepository for SurrealRoleRepository<C> {
    async fn create(&self, input: CreateRole) -> GatekeepResult<Role> {
        if self.find_by_name(&input.name).await?.is_some() {
            return Err(GatekeepError::AlreadyExists {
                entity: format!("role {}", input.name),
            });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        self.db
            .query(
                "CREATE type::record('role', $id) SET \
                 name = $name, description = $description, status = $status, \
                 created_at = $now, updated_at = $now",
            )
            .bind(("id", id.to_string()))
            .bind(("name", input.name.clone()))
            .bind(("description", input.description.clone()))
            .bind(("status", EntityStatus::Active.as_str().to_string()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "role"))?;

        Ok(Role {
            id,
            name: input.name,
            description: input.description,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> GatekeepResult<Role> {
        let id_str = id.to_string();
        let query = format!("SELECT {ROLE_FIELDS} FROM type::record('role', $id)");

        let mut result = self
            .db
            .query(query)
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            id: id_str,
        })?;

        Ok(row.try_into_role()?)
    }

    async fn get_by_name(&self, name: &str) -> GatekeepResult<Role> {
        self.find_by_name(name)
            .await?
            .ok_or_else(|| GatekeepError::not_found("role", name))
    }

    async fn update(&self, id: Uuid, input: UpdateRole) -> GatekeepResult<Role> {
        let current = self.get_by_id(id).await?;

        if let Some(name) = input.name.as_deref()
            && name != current.name
            && self.find_by_name(name).await?.is_some()
        {
            return Err(GatekeepError::AlreadyExists {
                entity: format!("role {name}"),
            });
        }

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.description.is_some() {
            sets.push("description = $description");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        sets.push("updated_at = $now");

        let query = format!("UPDATE type::record('role', $id) SET {}", sets.join(", "));

        let mut builder = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("now", Utc::now()));

        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(description) = input.description {
            builder = builder.bind(("description", description));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str().to_string()));
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "role"))?;

        self.get_by_id(id).await
    }

    async fn list(&self, status: StatusFilter) -> GatekeepResult<Vec<Role>> {
        let filter = match status {
            StatusFilter::ActiveOnly => " WHERE status = 'Active'",
            StatusFilter::Any => "",
        };
        let query = format!("SELECT {ROLE_FIELDS} FROM role{filter} ORDER BY name");

        let mut result = self.db.query(query).await.map_err(DbError::from)?;
        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;

        let roles = rows
            .into_iter()
            .map(RoleRow::try_into_role)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(roles)
    }

    async fn assign_to_user(&self, user_id: Uuid, role_id: Uuid) -> GatekeepResult<bool> {
        if self.is_member(user_id, role_id).await? {
            return Ok(false);
        }

        let outcome = self
            .db
            .query(
                "CREATE type::record('user_role', [$user_id, $role_id]) SET \
                 user_id = $user_id, role_id = $role_id, created_at = $now",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("role_id", role_id.to_string()))
            .bind(("now", Utc::now()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "user_role"));

        match outcome {
            Ok(_) => Ok(true),
            // Lost a race with a concurrent assignment.
            Err(DbError::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn unassign_from_user(&self, user_id: Uuid, role_id: Uuid) -> GatekeepResult<bool> {
        if !self.is_member(user_id, role_id).await? {
            return Ok(false);
        }

        self.db
            .query("DELETE type::record('user_role', [$user_id, $role_id])")
            .bind(("user_id", user_id.to_string()))
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "user_role"))?;

        Ok(true)
    }

    async fn get_user_roles(&self, user_id: Uuid, status: StatusFilter) -> GatekeepResult<Vec<Role>> {
        let filter = match status {
            StatusFilter::ActiveOnly => " AND status = 'Active'",
            StatusFilter::Any => "",
        };
        let query = format!(
            "SELECT {ROLE_FIELDS} FROM role \
             WHERE meta::id(id) IN (\
                 SELECT VALUE role_id FROM user_role WHERE user_id = $user_id\
             ){filter} \
             ORDER BY name"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let roles = rows
            .into_iter()
            .map(RoleRow::try_into_role)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(roles)
    }

    async fn get_role_members(&self, role_id: Uuid) -> GatekeepResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query("SELECT VALUE user_id FROM user_role WHERE role_id = $role_id")
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(parse_ids(rows, "user")?)
    }

    async fn get_user_role_grants(
        &self,
        user_id: Uuid,
        status: StatusFilter,
    ) -> GatekeepResult<Vec<RoleGrants>> {
        let roles = self.get_user_roles(user_id, status).await?;

        // One indexed lookup per role; memberships are small.
        let mut grants = Vec::with_capacity(roles.len());
        for role in roles {
            let permission_ids = self.get_role_permissions(role.id).await?.into_iter().collect();
            grants.push(RoleGrants {
                role,
                permission_ids,
            });
        }
        Ok(grants)
    }

    async fn get_role_permissions(&self, role_id: Uuid) -> GatekeepResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query(
                "SELECT VALUE permission_id FROM role_permission WHERE role_id = $role_id",
            )
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<String> = result.take(0).map_err(DbError::from)?;
        let mut ids = parse_ids(rows, "permission")?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn has_permission(&self, role_id: Uuid, permission_id: Uuid) -> GatekeepResult<bool> {
        let mut result = self
            .db
            .query(
                "SELECT VALUE permission_id FROM \
                 type::record('role_permission', [$role_id, $permission_id])",
            )
            .bind(("role_id", role_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        if self.has_permission(role_id, permission_id).await? {
            return Err(GatekeepError::AlreadyExists {
                entity: "role_permission".into(),
            });
        }
        let entry = stamp(audit)?;

        let query = format!(
            "BEGIN TRANSACTION; \
             CREATE type::record('role_permission', [$role_id, $permission_id]) SET \
             role_id = $role_id, permission_id = $permission_id, created_at = $now; \
             {APPEND_AUDIT}; \
             COMMIT TRANSACTION;"
        );
        self.db
            .query(query)
            .bind(("role_id", role_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .bind(("now", entry.performed_at))
            .bind(audit_binding(&entry))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "role_permission"))?;

        Ok(entry)
    }

    async fn revoke_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        audit: CreateAuditLogEntry,
    ) -> GatekeepResult<PermissionAuditLog> {
        let entry = stamp(audit)?;

        let query = format!(
            "BEGIN TRANSACTION; \
             {delete} \
             {APPEND_AUDIT}; \
             COMMIT TRANSACTION;",
            delete = guarded_delete("type::record('role_permission', [$role_id, $permission_id])"),
        );
        let outcome = self
            .db
            .query(query)
            .bind(("role_id", role_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .bind(audit_binding(&entry))
            .await
            .map_err(DbError::from)?
            .check();

        let Err(e) = outcome else {
            return Ok(entry);
        };
        if is_missing(&e) || !self.has_permission(role_id, permission_id).await? {
            return Err(GatekeepError::not_found(
                "role_permission",
                format!("{role_id}/{permission_id}"),
            ));
        }
        Err(write_error(e, "role_permission").into())
    }
}
