//! Building pools for keys the registry has not seen

use std::sync::Arc;

use async_trait::async_trait;
use keypool_core::{HandleFactory, ResourceKey, Result};

use crate::pool::{PoolConfig, ResourcePool};

/// Builds the pool for a key on a registry miss, expiry or refresh
///
/// Implemented for closures `Fn(&ResourceKey) -> Result<ResourcePool<F>>`,
/// so callers can vary the pool configuration per key.
#[async_trait]
pub trait PoolLoader<F: HandleFactory>: Send + Sync + 'static {
    async fn load(&self, key: &ResourceKey) -> Result<ResourcePool<F>>;
}

#[async_trait]
impl<F, C> PoolLoader<F> for C
where
    F: HandleFactory,
    C: Fn(&ResourceKey) -> Result<ResourcePool<F>> + Send + Sync + 'static,
{
    async fn load(&self, key: &ResourceKey) -> Result<ResourcePool<F>> {
        (self)(key)
    }
}

/// Loader giving every key a pool with the same configuration and factory
///
/// Each pool starts its maintenance task, so the idle floor is filled in
/// the background right after the load.
pub struct FactoryLoader<F: HandleFactory> {
    factory: Arc<F>,
    config: PoolConfig,
}

impl<F: HandleFactory> FactoryLoader<F> {
    pub fn new(factory: Arc<F>, config: PoolConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[async_trait]
impl<F: HandleFactory> PoolLoader<F> for FactoryLoader<F> {
    async fn load(&self, key: &ResourceKey) -> Result<ResourcePool<F>> {
        self.config.validate()?;
        let pool = ResourcePool::new(key.clone(), self.config.clone(), Arc::clone(&self.factory));
        pool.start_maintenance();
        tracing::info!(
            key = %key,
            pool_id = %pool.id(),
            max_total = self.config.max_total(),
            min_idle = self.config.min_idle(),
            "built resource pool"
        );
        Ok(pool)
    }
}
