//! SurrealDB implementation of [`PermissionRepository`].

use chrono::{DateTime, Utc};
use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::permission::{CreatePermission, Permission, UpdatePermission};
use gatekeep_core::models::status::{EntityStatus, StatusFilter};
use gatekeep_core::repository::PermissionRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{parse_uuid, write_error};
use crate::error::DbError;

const PERMISSION_FIELDS: &str = "meta::id(id) AS record_id, resource, action, \
    description, category, status, parent_permission_id, created_at, updated_at";

#[derive(Debug, SurrealValue)]
struct PermissionRow {
    record_id: String,
    resource: String,
    action: String,
    description: String,
    category: Option<String>,
    status: String,
    parent_permission_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRow {
    fn try_into_permission(self) -> Result<Permission, DbError> {
        let status = self
            .status
            .parse::<EntityStatus>()
            .map_err(|e| DbError::Decode(e.to_string()))?;
        let parent_permission_id = self
            .parent_permission_id
            .as_deref()
            .map(|raw| parse_uuid(raw, "parent permission"))
            .transpose()?;
        Ok(Permission {
            id: parse_uuid(&self.record_id, "permission")?,
            resource: self.resource,
            action: self.action,
            description: self.description,
            category: self.category,
            status,
            parent_permission_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the permission catalog.
#[derive(Clone)]
pub struct SurrealPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_by_name(&self, resource: &str, action: &str) -> GatekeepResult<Option<Permission>> {
        let query = format!(
            "SELECT {PERMISSION_FIELDS} FROM permission \
             WHERE resource = $resource AND action = $action"
        );
        let mut result = self
            .db
            .query(query)
            .bind(("resource", resource.to_string()))
            .bind(("action", action.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_permission()?)),
            None => Ok(None),
        }
    }
}

impl<C: Connection> PermissionRepository for SurrealPermissionRepository<C> {
    async fn create(&self, input: CreatePermission) -> GatekeepResult<Permission> {
        if self.find_by_name(&input.resource, &input.action).await?.is_some() {
            return Err(GatekeepError::AlreadyExists {
                entity: format!("permission {}", input.name()),
            });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        self.db
            .query(
                "CREATE type::record('permission', $id) SET \
                 resource = $resource, action = $action, \
                 description = $description, category = $category, \
                 status = $status, parent_permission_id = $parent_permission_id, \
                 created_at = $now, updated_at = $now",
            )
            .bind(("id", id.to_string()))
            .bind(("resource", input.resource.clone()))
            .bind(("action", input.action.clone()))
            .bind(("description", input.description.clone()))
            .bind(("category", input.category.clone()))
            .bind(("status", EntityStatus::Active.as_str().to_string()))
            .bind((
                "parent_permission_id",
                input.parent_permission_id.map(|p| p.to_string()),
            ))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "permission"))?;

        Ok(Permission {
            id,
            resource: input.resource,
            action: input.action,
            description: input.description,
            category: input.category,
            status: EntityStatus::Active,
            parent_permission_id: input.parent_permission_id,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> GatekeepResult<Permission> {
        let id_str = id.to_string();
        let query = format!("SELECT {PERMISSION_FIELDS} FROM type::record('permission', $id)");

        let mut result = self
            .db
            .query(query)
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            id: id_str,
        })?;

        Ok(row.try_into_permission()?)
    }

    async fn get_by_name(&self, resource: &str, action: &str) -> GatekeepResult<Permission> {
        self.find_by_name(resource, action)
            .await?
            .ok_or_else(|| GatekeepError::not_found("permission", format!("{resource}.{action}")))
    }

    async fn update(&self, id: Uuid, input: UpdatePermission) -> GatekeepResult<Permission> {
        self.get_by_id(id).await?;

        let mut sets = Vec::new();
        if input.description.is_some() {
            sets.push("description = $description");
        }
        if input.category.is_some() {
            sets.push("category = $category");
        }
        if input.parent_permission_id.is_some() {
            sets.push("parent_permission_id = $parent_permission_id");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        sets.push("updated_at = $now");

        let query = format!(
            "UPDATE type::record('permission', $id) SET {}",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("now", Utc::now()));

        if let Some(description) = input.description {
            builder = builder.bind(("description", description));
        }
        if let Some(category) = input.category {
            builder = builder.bind(("category", category));
        }
        if let Some(parent) = input.parent_permission_id {
            builder = builder.bind(("parent_permission_id", parent.map(|p| p.to_string())));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str().to_string()));
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| write_error(e, "permission"))?;

        self.get_by_id(id).await
    }

    async fn list(&self, status: StatusFilter) -> GatekeepResult<Vec<Permission>> {
        let filter = match status {
            StatusFilter::ActiveOnly => " WHERE status = 'Active'",
            StatusFilter::Any => "",
        };
        let query = format!(
            "SELECT {PERMISSION_FIELDS} FROM permission{filter} ORDER BY resource, action"
        );

        let mut result = self.db.query(query).await.map_err(DbError::from)?;
        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;

        let permissions = rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(permissions)
    }
}
