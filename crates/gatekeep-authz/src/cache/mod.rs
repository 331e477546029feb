//! Two-tier cache of effective permissions.
//!
//! The local tier is a bounded `moka` cache inside the process; the
//! distributed tier is any [`DistributedCache`] backend shared between
//! instances. Reads check local, then distributed; [`PermissionCache::get_or_fill`]
//! computes on a miss in both and back-fills both.
//!
//! Fills for one user are serialized (single flight). Every invalidation
//! bumps a generation counter, and a fill that started under an older
//! generation never publishes its result, so a write that commits and then
//! invalidates cannot be masked by a fill that read pre-commit data.
//! Per-user generations are forgotten after [`GENERATION_RETENTION`]; a
//! fill observed longer ago than that is never published either.
//!
//! The distributed tier is an optimization: its failures are logged and
//! treated as misses.

mod distributed;

pub use distributed::InMemoryDistributedCache;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gatekeep_core::cache::DistributedCache;
use gatekeep_core::error::GatekeepResult;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthzConfig;
use crate::engine::EffectivePermissions;

/// Distributed-tier key holding a user's effective permissions.
pub fn user_key(user_id: Uuid) -> String {
    format!("user:{user_id}:permissions")
}

/// Prefix covering every distributed-tier key of a user.
pub fn user_prefix(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

const ALL_USERS_PREFIX: &str = "user:";

/// How long a user's generation is remembered after its last bump.
const GENERATION_RETENTION: Duration = Duration::from_secs(300);

/// Map size that triggers the first sweep of forgotten generations.
const GENERATION_SWEEP_FLOOR: usize = 1024;

#[derive(Debug, Clone)]
struct LocalEntry {
    permissions: Arc<EffectivePermissions>,
    valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Generation {
    global: u64,
    user: u64,
    observed_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct UserGeneration {
    value: u64,
    bumped_at: Instant,
}

/// Holds a user's fill lock and drops the lock entry once nobody else is
/// waiting on it, even when the fill future is cancelled.
struct FillSlot<'a> {
    user_id: Uuid,
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FillSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct PermissionCache<D: DistributedCache> {
    local: moka::future::Cache<Uuid, LocalEntry>,
    distributed: D,
    local_ttl: Duration,
    distributed_ttl: Duration,
    fill_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    generations: DashMap<Uuid, UserGeneration>,
    generation_clock: AtomicU64,
    generation_retention: Duration,
    sweep_at: AtomicUsize,
    global_generation: AtomicU64,
}

impl<D: DistributedCache> PermissionCache<D> {
    pub fn new(distributed: D, config: &AuthzConfig) -> Self {
        let local = moka::future::Cache::builder()
            .max_capacity(config.local_cache_capacity)
            .time_to_live(config.local_cache_ttl())
            .build();
        Self {
            local,
            distributed,
            local_ttl: config.local_cache_ttl(),
            distributed_ttl: config.distributed_cache_ttl(),
            fill_locks: DashMap::new(),
            generations: DashMap::new(),
            generation_clock: AtomicU64::new(0),
            generation_retention: GENERATION_RETENTION,
            sweep_at: AtomicUsize::new(GENERATION_SWEEP_FLOOR),
            global_generation: AtomicU64::new(0),
        }
    }

    pub fn distributed(&self) -> &D {
        &self.distributed
    }

    /// Cached snapshot for `user_id`, local tier first. A distributed hit is
    /// copied into the local tier.
    pub async fn get(&self, user_id: Uuid) -> Option<Arc<EffectivePermissions>> {
        if let Some(hit) = self.get_local(user_id).await {
            return Some(hit);
        }

        let generation = self.generation(user_id);
        let permissions = Arc::new(self.get_distributed(user_id).await?);
        debug!(%user_id, "distributed permission cache hit");
        self.publish_local(user_id, Arc::clone(&permissions), self.local_ttl, generation)
            .await;
        Some(permissions)
    }

    /// Store a snapshot in both tiers. `ttl` overrides the local tier TTL;
    /// either tier's entry never outlives the snapshot's own validity.
    pub async fn set(&self, user_id: Uuid, permissions: EffectivePermissions, ttl: Option<Duration>) {
        let generation = self.generation(user_id);
        self.publish(user_id, Arc::new(permissions), ttl, generation)
            .await;
    }

    /// Read-through with single flight: concurrent misses for one user run
    /// `fill` once.
    pub async fn get_or_fill<F, Fut>(
        &self,
        user_id: Uuid,
        fill: F,
    ) -> GatekeepResult<Arc<EffectivePermissions>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatekeepResult<EffectivePermissions>>,
    {
        if let Some(hit) = self.get(user_id).await {
            return Ok(hit);
        }

        let lock = Arc::clone(&self.fill_locks.entry(user_id).or_default());
        let _slot = FillSlot {
            user_id,
            locks: &self.fill_locks,
            guard: Some(lock.lock_owned().await),
        };

        if let Some(hit) = self.get_local(user_id).await {
            debug!(%user_id, "permission cache filled by concurrent request");
            return Ok(hit);
        }

        let generation = self.generation(user_id);
        debug!(%user_id, "permission cache miss, evaluating");
        let permissions = Arc::new(fill().await?);
        self.publish(user_id, Arc::clone(&permissions), None, generation)
            .await;
        Ok(permissions)
    }

    pub async fn invalidate_user(&self, user_id: Uuid) {
        self.bump(user_id);
        self.local.invalidate(&user_id).await;
        if let Err(e) = self.distributed.delete_prefix(&user_prefix(user_id)).await {
            warn!(%user_id, error = %e, "distributed permission cache invalidation failed");
        }
        debug!(%user_id, "permission cache invalidated");
    }

    pub async fn invalidate_users(&self, user_ids: &[Uuid]) {
        if user_ids.is_empty() {
            return;
        }
        for user_id in user_ids {
            self.bump(*user_id);
            self.local.invalidate(user_id).await;
        }
        let keys: Vec<String> = user_ids.iter().copied().map(user_key).collect();
        if let Err(e) = self.distributed.delete(&keys).await {
            warn!(count = user_ids.len(), error = %e, "distributed permission cache invalidation failed");
        }
        debug!(count = user_ids.len(), "permission cache invalidated for users");
    }

    pub async fn invalidate_all(&self) {
        self.generations.clear();
        self.global_generation.fetch_add(1, Ordering::AcqRel);
        self.local.invalidate_all();
        if let Err(e) = self.distributed.delete_prefix(ALL_USERS_PREFIX).await {
            warn!(error = %e, "distributed permission cache invalidation failed");
        }
        debug!("permission cache invalidated for all users");
    }

    async fn get_local(&self, user_id: Uuid) -> Option<Arc<EffectivePermissions>> {
        let entry = self.local.get(&user_id).await?;
        if entry.valid_until <= Utc::now() {
            self.local.invalidate(&user_id).await;
            return None;
        }
        debug!(%user_id, "local permission cache hit");
        Some(entry.permissions)
    }

    async fn get_distributed(&self, user_id: Uuid) -> Option<EffectivePermissions> {
        let payload = match self.distributed.get(&user_key(user_id)).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!(%user_id, error = %e, "distributed permission cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<EffectivePermissions>(&payload) {
            Ok(permissions) if permissions.is_stale_at(Utc::now()) => None,
            Ok(permissions) => Some(permissions),
            Err(e) => {
                warn!(%user_id, error = %e, "discarding undecodable distributed cache entry");
                None
            }
        }
    }

    async fn publish(
        &self,
        user_id: Uuid,
        permissions: Arc<EffectivePermissions>,
        ttl: Option<Duration>,
        generation: Generation,
    ) {
        if !self
            .publish_local(
                user_id,
                Arc::clone(&permissions),
                ttl.unwrap_or(self.local_ttl),
                generation,
            )
            .await
        {
            return;
        }

        let Some(ttl) = bounded_ttl(self.distributed_ttl, permissions.valid_until()) else {
            return;
        };
        let payload = match serde_json::to_string(&*permissions) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%user_id, error = %e, "could not encode permissions for the distributed cache");
                return;
            }
        };
        if let Err(e) = self.distributed.set(&user_key(user_id), payload, ttl).await {
            warn!(%user_id, error = %e, "distributed permission cache write failed");
            return;
        }

        if !self.is_current(user_id, generation) {
            debug!(%user_id, "invalidation raced a fill, retracting distributed entry");
            if let Err(e) = self.distributed.delete(&[user_key(user_id)]).await {
                warn!(%user_id, error = %e, "distributed permission cache invalidation failed");
            }
        }
    }

    /// Insert into the local tier unless an invalidation happened since
    /// `generation` was observed. Returns whether the entry stayed.
    async fn publish_local(
        &self,
        user_id: Uuid,
        permissions: Arc<EffectivePermissions>,
        ttl: Duration,
        generation: Generation,
    ) -> bool {
        if !self.is_current(user_id, generation) {
            debug!(%user_id, "discarding permissions computed before an invalidation");
            return false;
        }
        let Some(ttl) = bounded_ttl(ttl, permissions.valid_until()) else {
            return false;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };

        let entry = LocalEntry {
            permissions,
            valid_until: Utc::now() + ttl,
        };
        self.local.insert(user_id, entry).await;

        if !self.is_current(user_id, generation) {
            self.local.invalidate(&user_id).await;
            return false;
        }
        true
    }

    fn generation(&self, user_id: Uuid) -> Generation {
        Generation {
            global: self.global_generation.load(Ordering::Acquire),
            user: self.generations.get(&user_id).map(|g| g.value).unwrap_or(0),
            observed_at: Instant::now(),
        }
    }

    /// No invalidation since `observed`, and `observed` is recent enough
    /// that a forgotten generation cannot hide one.
    fn is_current(&self, user_id: Uuid, observed: Generation) -> bool {
        let now = self.generation(user_id);
        now.global == observed.global
            && now.user == observed.user
            && observed.observed_at.elapsed() < self.generation_retention
    }

    /// Values come from one clock so a forgotten user never reuses one.
    fn bump(&self, user_id: Uuid) {
        let value = self.generation_clock.fetch_add(1, Ordering::AcqRel) + 1;
        self.generations.insert(
            user_id,
            UserGeneration {
                value,
                bumped_at: Instant::now(),
            },
        );
        if self.generations.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.forget_old_generations();
        }
    }

    fn forget_old_generations(&self) {
        let retention = self.generation_retention;
        self.generations
            .retain(|_, g| g.bumped_at.elapsed() < retention);
        let next = (self.generations.len() * 2).max(GENERATION_SWEEP_FLOOR);
        self.sweep_at.store(next, Ordering::Relaxed);
        debug!(remaining = self.generations.len(), "forgot old permission cache generations");
    }
}

/// `ttl`, shortened so the entry expires no later than `valid_until`.
/// `None` when the snapshot is already stale.
fn bounded_ttl(ttl: Duration, valid_until: Option<DateTime<Utc>>) -> Option<Duration> {
    let Some(valid_until) = valid_until else {
        return Some(ttl);
    };
    let remaining = (valid_until - Utc::now()).to_std().ok()?;
    if remaining.is_zero() {
        return None;
    }
    Some(ttl.min(remaining))
}
