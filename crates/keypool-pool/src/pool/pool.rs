//! Resource pool implementation

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use keypool_core::{HandleFactory, KeypoolError, ResourceKey, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::config::PoolConfig;
use super::lease::{HandleId, Lease};
use super::stats::PoolStats;

/// Internal wrapper for idle handles with metadata
pub(super) struct IdleHandle<H> {
    pub(super) id: HandleId,
    pub(super) handle: H,
    pub(super) created_at: Instant,
    pub(super) last_used_at: Instant,
}

impl<H> IdleHandle<H> {
    pub(super) fn new(id: HandleId, handle: H, created_at: Instant) -> Self {
        Self {
            id,
            handle,
            created_at,
            last_used_at: Instant::now(),
        }
    }
}

/// Mutable pool state, guarded by the pool lock
pub(super) struct PoolState<H> {
    /// Idle handles, least recently used at the front
    pub(super) idle: VecDeque<IdleHandle<H>>,
    /// Handles currently lent out (or claimed by a maintenance scan)
    pub(super) active: HashSet<HandleId>,
    /// Creations in flight; they count against `max_total`
    pub(super) creating: usize,
    pub(super) closed: bool,
}

impl<H> PoolState<H> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: HashSet::new(),
            creating: 0,
            closed: false,
        }
    }

    pub(super) fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.creating
    }
}

/// State shared between a pool, its clones, its leases and its maintenance task
pub(super) struct PoolShared<F: HandleFactory> {
    pub(super) id: Uuid,
    pub(super) key: ResourceKey,
    pub(super) config: PoolConfig,
    pub(super) factory: Arc<F>,
    pub(super) state: Mutex<PoolState<F::Handle>>,
    /// Signalled whenever a handle or a unit of capacity frees up
    pub(super) available: Notify,
    pub(super) maintenance: Mutex<Option<JoinHandle<()>>>,
    next_handle_id: AtomicU64,
    waiting: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl<F: HandleFactory> PoolShared<F> {
    pub(super) fn record_created(&self) -> HandleId {
        self.created.fetch_add(1, Ordering::Relaxed);
        HandleId::new(self.next_handle_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Destroy a handle through the factory, logging failures
    pub(super) async fn destroy(&self, handle: F::Handle) {
        if let Err(e) = self.factory.destroy(&self.key, handle).await {
            tracing::warn!(key = %self.key, pool_id = %self.id, error = %e, "failed to destroy handle");
        }
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Destroy a handle from a synchronous context
    pub(super) fn spawn_destroy(self: &Arc<Self>, handle: F::Handle) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(self);
                runtime.spawn(async move { shared.destroy(handle).await });
            }
            Err(_) => {
                tracing::warn!(key = %self.key, pool_id = %self.id, "no async runtime; dropping handle without destroy");
                self.destroyed.fetch_add(1, Ordering::Relaxed);
                drop(handle);
            }
        }
    }

    /// Put a lent-out handle back into the idle set
    ///
    /// A handle coming back to a retired pool is destroyed instead.
    pub(super) fn check_in(
        self: &Arc<Self>,
        id: HandleId,
        handle: F::Handle,
        created_at: Instant,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.active.remove(&id) {
            drop(state);
            tracing::error!(key = %self.key, pool_id = %self.id, handle_id = %id, "returned handle is not active in this pool");
            self.spawn_destroy(handle);
            return Err(KeypoolError::InvalidOwner(format!(
                "handle {} is not active in pool for '{}'",
                id, self.key
            )));
        }
        if state.closed {
            drop(state);
            tracing::debug!(key = %self.key, pool_id = %self.id, handle_id = %id, "handle returned to a retired pool; destroying");
            self.spawn_destroy(handle);
            return Ok(());
        }
        state.idle.push_back(IdleHandle::new(id, handle, created_at));
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Remove a lent-out handle from the pool and destroy it
    pub(super) async fn discard(&self, id: HandleId, handle: F::Handle) -> Result<()> {
        let removed = self.state.lock().active.remove(&id);
        self.available.notify_one();
        self.destroy(handle).await;
        if removed {
            tracing::debug!(key = %self.key, pool_id = %self.id, handle_id = %id, "handle invalidated");
            Ok(())
        } else {
            tracing::error!(key = %self.key, pool_id = %self.id, handle_id = %id, "invalidated handle is not active in this pool");
            Err(KeypoolError::InvalidOwner(format!(
                "handle {} is not active in pool for '{}'",
                id, self.key
            )))
        }
    }
}

impl<F: HandleFactory> Drop for PoolShared<F> {
    fn drop(&mut self) {
        if let Some(task) = self.maintenance.get_mut().take() {
            task.abort();
        }
        let idle: Vec<_> = self.state.get_mut().idle.drain(..).collect();
        if idle.is_empty() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let factory = Arc::clone(&self.factory);
            let key = self.key.clone();
            runtime.spawn(async move {
                for idle in idle {
                    if let Err(e) = factory.destroy(&key, idle.handle).await {
                        tracing::warn!(key = %key, error = %e, "failed to destroy handle of dropped pool");
                    }
                }
            });
        }
    }
}

/// Capacity reserved for a handle being created
///
/// Dropping an uncommitted reservation gives the slot back, so a failed or
/// cancelled creation never leaks capacity.
pub(super) struct Reservation<'a, F: HandleFactory> {
    shared: &'a PoolShared<F>,
    armed: bool,
}

impl<'a, F: HandleFactory> Reservation<'a, F> {
    /// The caller must already have counted the slot in `creating`.
    pub(super) fn new(shared: &'a PoolShared<F>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    pub(super) fn commit(mut self, state: &mut PoolState<F::Handle>) {
        state.creating -= 1;
        self.armed = false;
    }
}

impl<F: HandleFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().creating -= 1;
            self.shared.available.notify_one();
        }
    }
}

/// Counts a borrower as waiting for as long as it is suspended
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Claim<H> {
    Idle(IdleHandle<H>),
    Create,
    Saturated,
    Closed,
}

/// A bounded pool of interchangeable handles for one resource key
///
/// Handles are lent out as [`Lease`]s. A lease goes back to the pool through
/// [`ResourcePool::release`], is destroyed through
/// [`ResourcePool::invalidate`], or returns to its pool automatically when
/// dropped. Cloning a pool is cheap and yields another reference to the same
/// pool.
pub struct ResourcePool<F: HandleFactory> {
    pub(super) shared: Arc<PoolShared<F>>,
}

impl<F: HandleFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: HandleFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("key", &self.shared.key)
            .field("id", &self.shared.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: HandleFactory> ResourcePool<F> {
    /// Create a new pool for `key`
    ///
    /// The pool starts empty; call [`ResourcePool::start_maintenance`] to run
    /// idle eviction and top-up in the background.
    pub fn new(key: impl Into<ResourceKey>, config: PoolConfig, factory: Arc<F>) -> Self {
        let key = key.into();
        let id = Uuid::new_v4();
        tracing::debug!(key = %key, pool_id = %id, max_total = config.max_total(), min_idle = config.min_idle(), "creating resource pool");
        Self {
            shared: Arc::new(PoolShared {
                id,
                key,
                config,
                factory,
                state: Mutex::new(PoolState::new()),
                available: Notify::new(),
                maintenance: Mutex::new(None),
                next_handle_id: AtomicU64::new(0),
                waiting: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
            }),
        }
    }

    /// Get the resource key this pool serves
    pub fn key(&self) -> &ResourceKey {
        &self.shared.key
    }

    /// Get the unique id of this pool instance
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether both values refer to the same pool instance
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Whether `lease` was borrowed from this pool instance
    pub fn owns(&self, lease: &Lease<F>) -> bool {
        Arc::ptr_eq(&lease.pool, &self.shared)
    }

    /// Whether the pool has been retired
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Borrow a handle, waiting at most `timeout` when the pool is saturated
    ///
    /// This will:
    /// 1. Hand out an idle handle if one is available
    /// 2. Otherwise create a new handle if the pool is under `max_total`
    /// 3. Otherwise wait for a handle to come back (if `block_when_exhausted`)
    ///
    /// Returns `Exhausted` when saturated and not blocking, `Timeout` when no
    /// capacity frees up in time, and `Factory` when creation fails.
    pub async fn borrow(&self, timeout: Duration) -> Result<Lease<F>> {
        let shared = &self.shared;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            // Registered before inspecting state so a release in between is not missed
            notified.as_mut().enable();

            match self.claim() {
                Claim::Idle(idle) => {
                    if let Some(lease) = self.activate(idle).await {
                        return Ok(lease);
                    }
                }
                Claim::Create => {
                    let reservation = Reservation::new(shared);
                    return self.create_lease(reservation).await;
                }
                Claim::Closed => {
                    return Err(KeypoolError::Closed(format!(
                        "pool for '{}' has been retired",
                        shared.key
                    )));
                }
                Claim::Saturated => {
                    if !shared.config.block_when_exhausted() {
                        return Err(KeypoolError::Exhausted(format!(
                            "all {} handles for '{}' are in use",
                            shared.config.max_total(),
                            shared.key
                        )));
                    }

                    let _waiting = WaitGuard::new(&shared.waiting);
                    if tokio::time::timeout_at(deadline, notified.as_mut())
                        .await
                        .is_err()
                    {
                        tracing::debug!(key = %shared.key, ?timeout, "borrow timed out");
                        return Err(KeypoolError::Timeout(format!(
                            "timed out waiting for a handle for '{}' (timeout: {:?})",
                            shared.key, timeout
                        )));
                    }
                }
            }
        }
    }

    /// Borrow a handle using the configured `max_wait` as timeout
    pub async fn borrow_default(&self) -> Result<Lease<F>> {
        self.borrow(self.shared.config.max_wait()).await
    }

    /// Return a borrowed handle to the pool
    ///
    /// Returns `InvalidOwner` if the lease belongs to another pool; the lease
    /// then goes back to the pool it came from.
    pub fn release(&self, lease: Lease<F>) -> Result<()> {
        self.check_owner(&lease)?;
        lease.check_in()
    }

    /// Destroy a borrowed handle instead of returning it
    ///
    /// Used when an operation on the handle failed. The handle never
    /// re-enters the idle set.
    pub async fn invalidate(&self, lease: Lease<F>) -> Result<()> {
        self.check_owner(&lease)?;
        lease.discard().await
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let (total, idle, active) = {
            let state = self.shared.state.lock();
            (state.total(), state.idle.len(), state.active.len())
        };
        PoolStats::new(
            total,
            idle,
            active,
            self.shared.waiting.load(Ordering::SeqCst),
        )
        .with_lifetime_counts(
            self.shared.created.load(Ordering::Relaxed),
            self.shared.destroyed.load(Ordering::Relaxed),
        )
    }

    /// Destroy all idle handles, keeping the pool open
    pub async fn close_idle(&self) -> usize {
        let handles: Vec<_> = {
            let mut state = self.shared.state.lock();
            state.idle.drain(..).collect()
        };

        let drained = handles.len();
        for idle in handles {
            self.shared.destroy(idle.handle).await;
        }
        drained
    }

    /// Move the idle handles of `retired` into this pool
    ///
    /// Handles keep their creation and last-use times and get fresh ids here.
    /// Those that do not fit under this pool's `max_total`, or arrive after
    /// this pool was closed, are destroyed. Returns the number adopted.
    pub(crate) async fn adopt_idle(&self, retired: &ResourcePool<F>) -> usize {
        let handles: Vec<_> = {
            let mut state = retired.shared.state.lock();
            state.idle.drain(..).collect()
        };
        if handles.is_empty() {
            return 0;
        }

        let (adopted, overflow) = {
            let mut state = self.shared.state.lock();
            let mut overflow = Vec::new();
            // Newest first, so the most recently used survive an overflow
            let mut adopted = Vec::new();
            for idle in handles.into_iter().rev() {
                let full = state.total() + adopted.len() >= self.shared.config.max_total();
                if state.closed || full {
                    overflow.push(idle);
                    continue;
                }
                let id = HandleId::new(self.shared.next_handle_id.fetch_add(1, Ordering::Relaxed));
                adopted.push(IdleHandle {
                    id,
                    handle: idle.handle,
                    created_at: idle.created_at,
                    last_used_at: idle.last_used_at,
                });
            }
            let count = adopted.len();
            // Older than anything created here: front of the deque
            for idle in adopted {
                state.idle.push_front(idle);
            }
            (count, overflow)
        };

        if adopted > 0 {
            self.shared.available.notify_waiters();
        }
        let dropped = overflow.len();
        for idle in overflow {
            retired.shared.destroy(idle.handle).await;
        }
        tracing::debug!(
            key = %self.shared.key,
            from_pool_id = %retired.shared.id,
            pool_id = %self.shared.id,
            adopted,
            dropped,
            "adopted idle handles"
        );
        adopted
    }

    /// Retire the pool
    ///
    /// Idle handles are destroyed, waiting borrowers fail with `Closed`, and
    /// handles still lent out are destroyed when they come back.
    #[tracing::instrument(skip(self), fields(key = %self.shared.key, pool_id = %self.shared.id))]
    pub async fn close(&self) {
        let (handles, still_active) = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            let handles: Vec<_> = state.idle.drain(..).collect();
            (handles, state.active.len())
        };

        if let Some(task) = self.shared.maintenance.lock().take() {
            task.abort();
        }
        self.shared.available.notify_waiters();

        let drained = handles.len();
        for idle in handles {
            self.shared.destroy(idle.handle).await;
        }
        tracing::info!(drained, still_active, "pool retired");
    }

    fn check_owner(&self, lease: &Lease<F>) -> Result<()> {
        if self.owns(lease) {
            return Ok(());
        }
        tracing::error!(
            key = %self.shared.key,
            pool_id = %self.shared.id,
            lease_key = %lease.key(),
            lease_pool_id = %lease.pool_id(),
            handle_id = %lease.id(),
            "handle does not belong to this pool"
        );
        Err(KeypoolError::InvalidOwner(format!(
            "handle {} belongs to pool {} for '{}', not pool {} for '{}'",
            lease.id(),
            lease.pool_id(),
            lease.key(),
            self.shared.id,
            self.shared.key
        )))
    }

    fn claim(&self) -> Claim<F::Handle> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Claim::Closed;
        }
        if let Some(idle) = state.idle.pop_back() {
            state.active.insert(idle.id);
            return Claim::Idle(idle);
        }
        if state.total() < self.shared.config.max_total() {
            state.creating += 1;
            return Claim::Create;
        }
        Claim::Saturated
    }

    /// Turn a claimed idle handle into a lease, validating it if configured
    async fn activate(&self, idle: IdleHandle<F::Handle>) -> Option<Lease<F>> {
        let lease = Lease::new(
            Arc::clone(&self.shared),
            idle.id,
            idle.handle,
            idle.created_at,
        );
        if !self.shared.config.test_on_borrow() {
            return Some(lease);
        }
        if self
            .shared
            .factory
            .validate(&self.shared.key, lease.handle())
            .await
        {
            return Some(lease);
        }

        let id = lease.id();
        tracing::debug!(key = %self.shared.key, handle_id = %id, "idle handle failed validation");
        if let Err(e) = lease.discard().await {
            tracing::warn!(key = %self.shared.key, handle_id = %id, error = %e, "failed to discard invalid idle handle");
        }
        None
    }

    async fn create_lease(&self, reservation: Reservation<'_, F>) -> Result<Lease<F>> {
        let shared = &self.shared;
        let handle = match shared.factory.create(&shared.key).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(key = %shared.key, pool_id = %shared.id, error = %e, "failed to create handle");
                return Err(e.into_factory(shared.key.as_str()));
            }
        };

        let id = shared.record_created();
        let closed = {
            let mut state = shared.state.lock();
            reservation.commit(&mut state);
            if !state.closed {
                state.active.insert(id);
            }
            state.closed
        };

        if closed {
            shared.destroy(handle).await;
            return Err(KeypoolError::Closed(format!(
                "pool for '{}' was retired while creating a handle",
                shared.key
            )));
        }

        tracing::debug!(key = %shared.key, pool_id = %shared.id, handle_id = %id, "created handle");
        Ok(Lease::new(Arc::clone(shared), id, handle, Instant::now()))
    }
}
