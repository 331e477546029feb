//! Process-local [`DistributedCache`] backend.
//!
//! Suitable for tests and single-node deployments. Multi-instance
//! deployments plug in a shared backend instead.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use gatekeep_core::cache::{CacheError, DistributedCache};

#[derive(Debug, Default)]
pub struct InMemoryDistributedCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire() {
        let cache = InMemoryDistributedCache::new();
        cache.set("k", "v".into(), Duration::from_millis(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn prefix_delete_spares_other_keys() {
        let cache = InMemoryDistributedCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("user:1:permissions", "a".into(), ttl).await.unwrap();
        cache.set("user:2:permissions", "b".into(), ttl).await.unwrap();
        cache.delete_prefix("user:1").await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("user:2:permissions").await.unwrap().is_some());
    }
}
