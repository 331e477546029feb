//! Contract for the shared (distributed) tier of the permission cache.
//!
//! A backend is a string key-value store with per-entry TTL and bulk
//! invalidation. It holds derived data only: losing entries is always
//! safe, and callers treat every error as a miss.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache payload could not be decoded: {0}")]
    Decode(String),
}

pub trait DistributedCache: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove the given keys. Missing keys are ignored.
    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove every key starting with `prefix`.
    fn delete_prefix(&self, prefix: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}
