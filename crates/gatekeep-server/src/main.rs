//! Gatekeep Server — Application entry point.
//!
//! Connects to SurrealDB, applies migrations, wires the authorization and
//! administration services over the SurrealDB-backed shared cache, and runs
//! the periodic maintenance sweep until Ctrl-C.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gatekeep_authz::{AuthorizationService, PermissionAdminService};
use gatekeep_db::repository::{
    SurrealPermissionRepository, SurrealRoleRepository, SurrealUserPermissionRepository,
};
use gatekeep_db::{DbManager, SurrealPermissionCache};
use surrealdb::engine::any::Any;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

/// Actor recorded on audit rows written by the expiry sweep.
const SWEEP_ACTOR: &str = "system:override-sweeper";

type Admin = PermissionAdminService<
    SurrealPermissionRepository<Any>,
    SurrealRoleRepository<Any>,
    SurrealUserPermissionRepository<Any>,
    SurrealPermissionCache<Any>,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gatekeep=info".parse()?))
        .json()
        .init();

    info!("Starting Gatekeep server...");
    let config = ServerConfig::from_env()?;

    let manager = DbManager::connect(&config.db)
        .await
        .context("connect to SurrealDB")?;
    let db = manager.client().clone();
    gatekeep_db::run_migrations(&db)
        .await
        .context("apply schema migrations")?;

    let authz = Arc::new(AuthorizationService::new(
        SurrealPermissionRepository::new(db.clone()),
        SurrealRoleRepository::new(db.clone()),
        SurrealUserPermissionRepository::new(db.clone()),
        SurrealPermissionCache::new(db.clone()),
        config.authz.clone(),
    ));
    let admin = PermissionAdminService::new(authz);

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(
        admin,
        SurrealPermissionCache::new(db),
        config.sweep_interval,
        shutdown.clone(),
    ));
    info!(sweep_interval_secs = config.sweep_interval.as_secs(), "Gatekeep server ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    info!("Shutdown signal received");
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "Override sweeper terminated abnormally");
    }

    info!("Gatekeep server stopped.");
    Ok(())
}

/// Remove expired overrides and stale shared-cache rows on every tick.
async fn run_sweeper(
    admin: Admin,
    shared_cache: SurrealPermissionCache<Any>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match admin.sweep_expired_overrides(SWEEP_ACTOR).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Expired overrides removed"),
            Err(e) => error!(error = %e, "Expired override sweep failed"),
        }
        if let Err(e) = shared_cache.purge_expired().await {
            error!(error = %e, "Shared cache purge failed");
        }
    }
}
