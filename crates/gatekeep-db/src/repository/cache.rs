//! SurrealDB-backed shared tier of the permission cache.
//!
//! Entries are keyed by their cache key (`type::record('permission_cache',
//! $key)`) and expire lazily: a read past `expires_at` is a miss, and
//! [`SurrealPermissionCache::purge_expired`] deletes stale rows in bulk.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gatekeep_core::cache::{CacheError, DistributedCache};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct CacheRow {
    payload: String,
    expires_at: DateTime<Utc>,
}

/// Shared permission cache stored in a SurrealDB table.
#[derive(Clone)]
pub struct SurrealPermissionCache<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionCache<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Delete every entry whose expiry has passed.
    pub async fn purge_expired(&self) -> Result<(), DbError> {
        self.db
            .query("DELETE permission_cache WHERE expires_at <= time::now()")
            .await?
            .check()?;
        debug!("Purged expired permission cache entries");
        Ok(())
    }
}

impl<C: Connection> DistributedCache for SurrealPermissionCache<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut result = self
            .db
            .query("SELECT payload, expires_at FROM type::record('permission_cache', $key)")
            .bind(("key", key.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CacheRow> = result.take(0).map_err(DbError::from)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        if row.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(row.payload))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::Backend(format!("invalid ttl: {e}")))?;
        let expires_at = Utc::now() + ttl;

        self.db
            .query(
                "UPSERT type::record('permission_cache', $key) SET \
                 cache_key = $key, payload = $payload, expires_at = $expires_at",
            )
            .bind(("key", key.to_string()))
            .bind(("payload", value))
            .bind(("expires_at", expires_at))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.db
                .query("DELETE type::record('permission_cache', $key)")
                .bind(("key", key.clone()))
                .await
                .map_err(DbError::from)?
                .check()
                .map_err(DbError::from)?;
        }

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        self.db
            .query("DELETE permission_cache WHERE string::starts_with(cache_key, $prefix)")
            .bind(("prefix", prefix.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from)?;

        Ok(())
    }
}
