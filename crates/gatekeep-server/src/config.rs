use std::time::Duration;

use anyhow::{Context, Result, ensure};
use gatekeep_authz::AuthzConfig;
use gatekeep_db::DbConfig;

// Server configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub authz: AuthzConfig,
    pub sweep_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = DbConfig::default();
        let db = DbConfig {
            url: env_or("GATEKEEP_DB_URL", defaults.url),
            namespace: env_or("GATEKEEP_DB_NAMESPACE", defaults.namespace),
            database: env_or("GATEKEEP_DB_DATABASE", defaults.database),
            username: env_or("GATEKEEP_DB_USER", defaults.username),
            password: env_or("GATEKEEP_DB_PASSWORD", defaults.password),
        };

        let mut authz = AuthzConfig::default();
        authz.local_cache_ttl_secs = env_secs("GATEKEEP_LOCAL_CACHE_TTL_SECS", authz.local_cache_ttl_secs)?;
        authz.distributed_cache_ttl_secs =
            env_secs("GATEKEEP_SHARED_CACHE_TTL_SECS", authz.distributed_cache_ttl_secs)?;
        let sweep_secs = env_secs("GATEKEEP_SWEEP_INTERVAL_SECS", 60)?;
        ensure!(sweep_secs > 0, "GATEKEEP_SWEEP_INTERVAL_SECS must be positive");

        Ok(Self {
            db,
            authz,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_falls_back() {
        assert_eq!(env_secs("GATEKEEP_TEST_UNSET_VARIABLE", 42).unwrap(), 42);
        assert_eq!(
            env_or("GATEKEEP_TEST_UNSET_VARIABLE", "mem://".into()),
            "mem://"
        );
    }
}
