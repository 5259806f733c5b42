//! Pool registry implementation

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use keypool_core::{HandleFactory, KeypoolError, ResourceKey, Result};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::config::RegistryConfig;
use super::entry::{PoolEntry, RegistryEntryInfo, RegistryStats};
use super::loader::{FactoryLoader, PoolLoader};
use crate::config::KeypoolConfig;
use crate::pool::{Lease, PoolConfig, ResourcePool};
use crate::retry::RetryPolicy;

/// Map cell for one key
///
/// The cell is filled exactly once, by whichever caller wins the load. A
/// slot is replaced (never refilled) when its entry expires or refreshes.
struct Slot<F: HandleFactory> {
    cell: OnceCell<PoolEntry<F>>,
    /// Nanoseconds since the registry epoch at the last access
    last_access: AtomicU64,
    refreshing: AtomicBool,
    /// Set once a caller has received the loaded pool; only settled slots
    /// are eviction candidates
    settled: AtomicBool,
}

impl<F: HandleFactory> Slot<F> {
    fn empty(now: u64) -> Self {
        Self {
            cell: OnceCell::new(),
            last_access: AtomicU64::new(now),
            refreshing: AtomicBool::new(false),
            settled: AtomicBool::new(false),
        }
    }

    fn ready(entry: PoolEntry<F>, last_access: u64) -> Self {
        Self {
            cell: OnceCell::from(entry),
            last_access: AtomicU64::new(last_access),
            refreshing: AtomicBool::new(false),
            settled: AtomicBool::new(true),
        }
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Counters {
    loads: AtomicU64,
    load_failures: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

struct RegistryInner<F: HandleFactory> {
    config: RegistryConfig,
    loader: Arc<dyn PoolLoader<F>>,
    slots: DashMap<ResourceKey, Arc<Slot<F>>>,
    epoch: Instant,
    counters: Counters,
    closed: AtomicBool,
}

impl<F: HandleFactory> RegistryInner<F> {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn touch(&self, slot: &Slot<F>) {
        slot.last_access.store(self.now(), Ordering::Relaxed);
    }

    fn is_current(&self, key: &ResourceKey, slot: &Arc<Slot<F>>) -> bool {
        self.slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Remove `key` only if it still maps to `slot`
    fn remove_if_current(&self, key: &ResourceKey, slot: &Arc<Slot<F>>) -> bool {
        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot))
            .is_some()
    }

    #[tracing::instrument(skip_all, fields(key = %key))]
    async fn load(&self, key: &ResourceKey) -> Result<PoolEntry<F>> {
        match self.loader.load(key).await {
            Ok(pool) => {
                self.counters.loads.fetch_add(1, Ordering::Relaxed);
                tracing::info!(pool_id = %pool.id(), "loaded pool entry");
                Ok(PoolEntry::new(pool))
            }
            Err(e) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to load pool entry");
                Err(e)
            }
        }
    }

    /// Reload `stale` and install the new pool if `slot` is still current
    ///
    /// Idle handles of the stale pool move to the new one; handles lent out
    /// are destroyed when they come back to the retired pool.
    #[tracing::instrument(skip_all, fields(key = %key))]
    async fn refresh(&self, key: ResourceKey, slot: Arc<Slot<F>>, stale: PoolEntry<F>) {
        let pool = match self.loader.load(&key).await {
            Ok(pool) => pool,
            Err(e) => {
                self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "background refresh failed; keeping current pool");
                slot.refreshing.store(false, Ordering::Release);
                return;
            }
        };

        let fresh = stale.refreshed(pool);
        let replacement = Arc::new(Slot::ready(fresh.clone(), slot.last_access()));
        let swapped = match self.slots.get_mut(&key) {
            Some(mut current) if Arc::ptr_eq(current.value(), &slot) => {
                *current = replacement;
                true
            }
            _ => false,
        };

        if swapped {
            self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
            let adopted = fresh.pool().adopt_idle(stale.pool()).await;
            tracing::info!(
                old_pool_id = %stale.pool().id(),
                pool_id = %fresh.pool().id(),
                adopted,
                "refreshed pool entry"
            );
            stale.pool().close().await;
        } else {
            tracing::debug!("entry changed during refresh; discarding reloaded pool");
            fresh.pool().close().await;
        }
    }
}

/// Cache of resource pools keyed by [`ResourceKey`]
///
/// At most one live pool exists per key. Concurrent `get`s for a key that is
/// not cached share one load. Cloning a registry is cheap and yields another
/// reference to the same cache.
pub struct PoolRegistry<F: HandleFactory> {
    inner: Arc<RegistryInner<F>>,
}

impl<F: HandleFactory> Clone for PoolRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: HandleFactory> fmt::Debug for PoolRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.slots.len())
            .finish()
    }
}

impl<F: HandleFactory> PoolRegistry<F> {
    /// Create a registry building every pool from `factory` with `pool_config`
    pub fn new(config: RegistryConfig, pool_config: PoolConfig, factory: Arc<F>) -> Self {
        Self::with_loader(config, FactoryLoader::new(factory, pool_config))
    }

    /// Create a registry from a loaded configuration file
    pub fn from_config(config: &KeypoolConfig, factory: Arc<F>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.registry.clone(),
            config.pool.clone(),
            factory,
        ))
    }

    /// Create a registry with a custom pool loader
    pub fn with_loader(config: RegistryConfig, loader: impl PoolLoader<F>) -> Self {
        tracing::debug!(
            expire = ?config.expire_after_write(),
            refresh = ?config.refresh_after_write(),
            max_entries = config.max_entries(),
            "creating pool registry"
        );
        Self {
            inner: Arc::new(RegistryInner {
                slots: DashMap::with_capacity(config.initial_capacity()),
                config,
                loader: Arc::new(loader),
                epoch: Instant::now(),
                counters: Counters::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Get the pool for `key`, loading it if absent or expired
    ///
    /// An entry past the refresh window is returned as is while a
    /// replacement loads in the background. Load failures are returned to
    /// every caller waiting on that load and nothing is cached.
    pub async fn get(&self, key: impl Into<ResourceKey>) -> Result<ResourcePool<F>> {
        let key = key.into();
        let inner = &self.inner;

        loop {
            self.ensure_open()?;
            let started = Instant::now();
            let slot = self.slot_for(&key);

            let entry = match slot.cell.get_or_try_init(|| inner.load(&key)).await {
                Ok(entry) => entry.clone(),
                Err(e) => {
                    inner.remove_if_current(&key, &slot);
                    return Err(e);
                }
            };

            if !inner.is_current(&key, &slot) {
                // Invalidated or evicted while loading
                if !entry.pool().is_closed() {
                    entry.pool().close().await;
                }
                continue;
            }
            inner.touch(&slot);

            if self.is_shut_down() {
                // Inserted after shutdown collected its keys
                inner.remove_if_current(&key, &slot);
                if !entry.pool().is_closed() {
                    entry.pool().close().await;
                }
                return Err(KeypoolError::Closed("pool registry has been shut down".into()));
            }

            if !slot.settled.swap(true, Ordering::AcqRel) {
                self.evict_overflow(&key).await;
            }

            // An entry loaded during this call is never stale
            if entry.last_write_at() < started {
                let age = entry.age();
                if age > inner.config.expire_after_write() {
                    if inner.remove_if_current(&key, &slot) {
                        inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(key = %key, pool_id = %entry.pool().id(), ?age, "pool entry expired; rebuilding");
                        entry.pool().close().await;
                    }
                    continue;
                }
                if inner
                    .config
                    .refresh_after_write()
                    .is_some_and(|refresh| age > refresh)
                {
                    self.schedule_refresh(&key, &slot, &entry);
                }
            }

            return Ok(entry.pool().clone());
        }
    }

    /// Get the pool for `key` only if it is cached and not expired
    pub fn get_if_present(&self, key: &str) -> Option<ResourcePool<F>> {
        let slot = self.inner.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let entry = slot.cell.get()?;
        if entry.age() > self.inner.config.expire_after_write() {
            return None;
        }
        self.inner.touch(&slot);
        Some(entry.pool().clone())
    }

    /// Remove the entry for `key` and retire its pool
    ///
    /// Idle handles are destroyed now; handles still lent out are destroyed
    /// when they come back.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) {
        let Some((_, slot)) = self.inner.slots.remove(key) else {
            tracing::debug!("no entry to invalidate");
            return;
        };
        self.inner
            .counters
            .invalidations
            .fetch_add(1, Ordering::Relaxed);

        match slot.cell.get() {
            Some(entry) => {
                tracing::info!(pool_id = %entry.pool().id(), "invalidated pool entry");
                entry.pool().close().await;
            }
            None => tracing::debug!("invalidated entry before its pool finished loading"),
        }
    }

    /// Borrow a handle from the pool for `key`
    ///
    /// If the pool is retired between lookup and borrow, the key is resolved
    /// again once within the same timeout.
    pub async fn borrow(
        &self,
        key: impl Into<ResourceKey>,
        timeout: Duration,
    ) -> Result<Lease<F>> {
        let key = key.into();
        let deadline = Instant::now() + timeout;

        let pool = self.get(key.clone()).await?;
        match pool.borrow(timeout).await {
            Err(KeypoolError::Closed(reason)) => {
                tracing::debug!(key = %key, %reason, "pool retired during borrow; resolving again");
                let pool = self.get(key).await?;
                pool.borrow(deadline.saturating_duration_since(Instant::now()))
                    .await
            }
            result => result,
        }
    }

    /// Borrow with retries on `Exhausted` and `Timeout`
    pub async fn borrow_with_retry(
        &self,
        key: impl Into<ResourceKey>,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Lease<F>> {
        let key = key.into();
        policy
            .execute(|_| {
                let key = key.clone();
                async move { self.borrow(key, timeout).await }
            })
            .await
    }

    /// Return a lease to the pool currently cached for its key
    ///
    /// A lease that outlived its entry goes back to its own, retired, pool
    /// and is destroyed there.
    pub fn recycle(&self, lease: Lease<F>) -> Result<()> {
        let current = self
            .inner
            .slots
            .get(lease.key().as_str())
            .and_then(|slot| slot.cell.get().map(|entry| entry.pool().clone()));

        match current {
            Some(pool) if pool.owns(&lease) => pool.release(lease),
            _ => {
                tracing::debug!(key = %lease.key(), pool_id = %lease.pool_id(), "lease outlived its pool entry");
                lease.release()
            }
        }
    }

    /// Destroy a lease whose handle failed
    pub async fn discard(&self, lease: Lease<F>) -> Result<()> {
        lease.invalidate().await
    }

    /// Borrow a handle for `key`, run `work` with it, then return it
    ///
    /// The handle goes back to the pool when `work` succeeds and is destroyed
    /// when it fails.
    pub async fn run<T, E, W>(
        &self,
        key: impl Into<ResourceKey>,
        timeout: Duration,
        work: W,
    ) -> std::result::Result<T, E>
    where
        E: From<KeypoolError>,
        W: for<'h> FnOnce(&'h F::Handle) -> BoxFuture<'h, std::result::Result<T, E>>,
    {
        let lease = self.borrow(key, timeout).await?;
        let outcome = work(lease.handle()).await;
        match outcome {
            Ok(value) => {
                self.recycle(lease)?;
                Ok(value)
            }
            Err(e) => {
                let key = lease.key().clone();
                if let Err(discard_err) = self.discard(lease).await {
                    tracing::warn!(key = %key, error = %discard_err, "failed to discard handle after failed work");
                }
                Err(e)
            }
        }
    }

    /// Per-key view of every loaded entry, sorted by key
    pub fn snapshot(&self) -> Vec<RegistryEntryInfo> {
        let mut entries: Vec<RegistryEntryInfo> = self
            .inner
            .slots
            .iter()
            .filter_map(|slot| slot.value().cell.get().map(PoolEntry::info))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Lifetime counters of this registry
    pub fn stats(&self) -> RegistryStats {
        let counters = &self.inner.counters;
        RegistryStats {
            loads: counters.loads.load(Ordering::Relaxed),
            load_failures: counters.load_failures.load(Ordering::Relaxed),
            refreshes: counters.refreshes.load(Ordering::Relaxed),
            refresh_failures: counters.refresh_failures.load(Ordering::Relaxed),
            expirations: counters.expirations.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            invalidations: counters.invalidations.load(Ordering::Relaxed),
            entries: self.inner.slots.len(),
        }
    }

    /// Number of keys held, including keys still loading
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self
            .inner
            .slots
            .iter()
            .map(|slot| slot.key().clone())
            .collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Retire every pool and refuse further lookups
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let keys: Vec<ResourceKey> = self
            .inner
            .slots
            .iter()
            .map(|slot| slot.key().clone())
            .collect();
        let mut retired = 0usize;
        for key in keys {
            if let Some((_, slot)) = self.inner.slots.remove(&key) {
                if let Some(entry) = slot.cell.get() {
                    entry.pool().close().await;
                    retired += 1;
                }
            }
        }
        tracing::info!(retired, "pool registry shut down");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(KeypoolError::Closed("pool registry has been shut down".into()));
        }
        Ok(())
    }

    /// Get the slot for `key`, inserting an empty one if absent
    fn slot_for(&self, key: &ResourceKey) -> Arc<Slot<F>> {
        if let Some(slot) = self.inner.slots.get(key) {
            return Arc::clone(slot.value());
        }
        match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot::empty(self.inner.now()));
                vacant.insert(Arc::clone(&slot));
                slot
            }
        }
    }

    /// Retire least recently used entries until within `max_entries`
    ///
    /// Slots still loading, or loaded but not yet handed to a caller, are
    /// never chosen. The map may briefly exceed `max_entries` while several
    /// keys load at once; the caller settling the last of them trims it.
    async fn evict_overflow(&self, keep: &ResourceKey) {
        let max_entries = self.inner.config.max_entries();
        while self.inner.slots.len() > max_entries {
            let victim = self
                .inner
                .slots
                .iter()
                .filter(|slot| slot.key() != keep && slot.value().is_settled())
                .min_by_key(|slot| slot.value().last_access())
                .map(|slot| (slot.key().clone(), Arc::clone(slot.value())));
            let Some((key, slot)) = victim else {
                break;
            };

            if self.inner.remove_if_current(&key, &slot) {
                self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(key = %key, "evicted least recently used pool entry");
                if let Some(entry) = slot.cell.get() {
                    entry.pool().close().await;
                }
            }
        }
    }

    fn schedule_refresh(&self, key: &ResourceKey, slot: &Arc<Slot<F>>, entry: &PoolEntry<F>) {
        if slot
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::debug!(key = %key, age = ?entry.age(), "scheduling background refresh");
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let slot = Arc::clone(slot);
        let stale = entry.clone();
        tokio::spawn(async move { inner.refresh(key, slot, stale).await });
    }
}
