//! Borrowed handle guard

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use keypool_core::{HandleFactory, ResourceKey, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::pool::PoolShared;

/// Identifier of a handle, unique within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(u64);

impl HandleId {
    pub(super) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A handle borrowed from a [`ResourcePool`](super::ResourcePool)
///
/// The lease remembers the pool it came from. When dropped without an
/// explicit release or invalidation, the handle goes back to that pool.
pub struct Lease<F: HandleFactory> {
    handle: Option<F::Handle>,
    id: HandleId,
    created_at: Instant,
    borrowed_at: Instant,
    pub(super) pool: Arc<PoolShared<F>>,
}

impl<F: HandleFactory> Lease<F> {
    pub(super) fn new(
        pool: Arc<PoolShared<F>>,
        id: HandleId,
        handle: F::Handle,
        created_at: Instant,
    ) -> Self {
        Self {
            handle: Some(handle),
            id,
            created_at,
            borrowed_at: Instant::now(),
            pool,
        }
    }

    /// Get the handle id
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Get the key of the pool the handle came from
    pub fn key(&self) -> &ResourceKey {
        &self.pool.key
    }

    /// Get the id of the pool the handle came from
    pub fn pool_id(&self) -> Uuid {
        self.pool.id
    }

    /// Time since the underlying handle was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the handle was borrowed
    pub fn held_for(&self) -> Duration {
        self.borrowed_at.elapsed()
    }

    /// Get the underlying handle
    pub fn handle(&self) -> &F::Handle {
        self.handle.as_ref().expect("handle taken")
    }

    /// Return the handle to the pool it came from
    pub fn release(self) -> Result<()> {
        self.check_in()
    }

    /// Destroy the handle, removing it from the pool it came from
    pub async fn invalidate(self) -> Result<()> {
        self.discard().await
    }

    pub(super) fn check_in(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.pool.check_in(self.id, handle, self.created_at),
            None => Ok(()),
        }
    }

    pub(super) async fn discard(mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let pool = Arc::clone(&self.pool);
        let id = self.id;
        drop(self);
        pool.discard(id, handle).await
    }
}

impl<F: HandleFactory> Deref for Lease<F> {
    type Target = F::Handle;

    fn deref(&self) -> &Self::Target {
        self.handle()
    }
}

impl<F: HandleFactory> DerefMut for Lease<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut().expect("handle taken")
    }
}

impl<F: HandleFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(key = %self.pool.key, handle_id = %self.id, "lease dropped without release; returning handle");
            let _ = self.pool.check_in(self.id, handle, self.created_at);
        }
    }
}

impl<F: HandleFactory> fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.pool.key)
            .field("id", &self.id)
            .field("pool_id", &self.pool.id)
            .finish()
    }
}
