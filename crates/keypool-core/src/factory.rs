//! Handle factory trait

use std::sync::Arc;

use async_trait::async_trait;

use crate::{ResourceKey, Result};

/// Factory for the expensive resources held by a pool.
///
/// A pool calls `create` when it needs to grow, `validate` when it hands out
/// or scans idle handles, and `destroy` when a handle is evicted, invalidated
/// or its pool is retired. `create` may be called concurrently for different
/// keys; the pool bounds how many creations run for one key.
#[async_trait]
pub trait HandleFactory: Send + Sync + 'static {
    /// The resource handed to callers
    type Handle: Send + Sync + 'static;

    /// Create a new handle for `key`
    async fn create(&self, key: &ResourceKey) -> Result<Self::Handle>;

    /// Release the resources behind a handle
    ///
    /// Errors are logged by the pool and never reach a borrower.
    async fn destroy(&self, key: &ResourceKey, handle: Self::Handle) -> Result<()>;

    /// Check that a handle is still usable
    ///
    /// Default implementation trusts the pool's own bookkeeping.
    async fn validate(&self, _key: &ResourceKey, _handle: &Self::Handle) -> bool {
        true
    }
}

#[async_trait]
impl<T: HandleFactory> HandleFactory for Arc<T> {
    type Handle = T::Handle;

    async fn create(&self, key: &ResourceKey) -> Result<Self::Handle> {
        (**self).create(key).await
    }

    async fn destroy(&self, key: &ResourceKey, handle: Self::Handle) -> Result<()> {
        (**self).destroy(key, handle).await
    }

    async fn validate(&self, key: &ResourceKey, handle: &Self::Handle) -> bool {
        (**self).validate(key, handle).await
    }
}
