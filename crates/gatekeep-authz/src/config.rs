//! Authorization configuration.

use std::time::Duration;

/// Configuration for the authorization service and its caches.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    /// Process-local cache TTL in seconds (default: 300 = 5 minutes).
    pub local_cache_ttl_secs: u64,
    /// Shared cache TTL in seconds (default: 900 = 15 minutes). Capped at
    /// `catalog_ttl_secs` so a peer's stale catalog cannot be shared for
    /// longer than it may be cached.
    pub distributed_cache_ttl_secs: u64,
    /// Maximum number of users held in the process-local cache.
    pub local_cache_capacity: u64,
    /// Lifetime of the cached permission catalog in seconds (default: 60).
    pub catalog_ttl_secs: u64,
}

impl AuthzConfig {
    pub fn local_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.local_cache_ttl_secs)
    }

    /// Effective shared cache TTL.
    pub fn distributed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.distributed_cache_ttl_secs).min(self.catalog_ttl())
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            local_cache_ttl_secs: 300,
            distributed_cache_ttl_secs: 900,
            local_cache_capacity: 10_000,
            catalog_ttl_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_ttl_never_exceeds_catalog_ttl() {
        let config = AuthzConfig::default();
        assert_eq!(config.distributed_cache_ttl(), config.catalog_ttl());

        let config = AuthzConfig {
            distributed_cache_ttl_secs: 30,
            ..Default::default()
        };
        assert_eq!(config.distributed_cache_ttl(), Duration::from_secs(30));
    }
}
