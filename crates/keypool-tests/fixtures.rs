//! Shared test fixtures
//!
//! Provides a simulated table-client factory with counters for every handle
//! created and destroyed, plus helpers to build pools and registries on top
//! of it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keypool_core::{HandleFactory, KeypoolError, ResourceKey, Result};
use keypool_pool::{PoolConfig, PoolRegistry, RegistryConfig, ResourcePool};
use parking_lot::Mutex;
use rstest::fixture;

/// A simulated per-table client handle
#[derive(Debug)]
pub struct SimulatedTable {
    /// Table the handle was opened for
    pub table: String,
    /// Creation order across the factory, starting at 0
    pub serial: usize,
    in_use: AtomicBool,
}

impl SimulatedTable {
    /// Mark the handle as being worked on
    ///
    /// Returns false if another caller was already using it.
    pub fn enter(&self) -> bool {
        !self.in_use.swap(true, Ordering::SeqCst)
    }

    /// Mark the handle as no longer being worked on
    pub fn leave(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

/// Factory for [`SimulatedTable`] handles
#[derive(Debug, Default)]
pub struct TableFactory {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    failing: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    invalid: Mutex<HashSet<usize>>,
}

impl TableFactory {
    /// Create a factory behind an `Arc`, ready to hand to pools
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handles created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Handles destroyed so far
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Handles created and not yet destroyed
    pub fn live(&self) -> usize {
        self.created() - self.destroyed()
    }

    /// Make every subsequent `create` fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `create` take `delay` before answering
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    /// Make the handle with `serial` fail validation from now on
    pub fn mark_invalid(&self, serial: usize) {
        self.invalid.lock().insert(serial);
    }
}

#[async_trait]
impl HandleFactory for TableFactory {
    type Handle = SimulatedTable;

    async fn create(&self, key: &ResourceKey) -> Result<SimulatedTable> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KeypoolError::factory(key.as_str(), "table is offline"));
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(table = %key, serial, "opened simulated table");
        Ok(SimulatedTable {
            table: key.to_string(),
            serial,
            in_use: AtomicBool::new(false),
        })
    }

    async fn destroy(&self, key: &ResourceKey, handle: SimulatedTable) -> Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(table = %key, serial = handle.serial, "closed simulated table");
        Ok(())
    }

    async fn validate(&self, _key: &ResourceKey, handle: &SimulatedTable) -> bool {
        !self.invalid.lock().contains(&handle.serial)
    }
}

/// Fresh factory for each test
#[fixture]
pub fn factory() -> Arc<TableFactory> {
    initialize_logging();
    TableFactory::new()
}

/// Build a pool for `table` on `factory`
pub fn table_pool(
    factory: &Arc<TableFactory>,
    table: &str,
    config: PoolConfig,
) -> ResourcePool<TableFactory> {
    ResourcePool::new(table, config, Arc::clone(factory))
}

/// Build a registry whose pools all use `pool` and `factory`
pub fn table_registry(
    factory: &Arc<TableFactory>,
    config: RegistryConfig,
    pool: PoolConfig,
) -> PoolRegistry<TableFactory> {
    PoolRegistry::new(config, pool, Arc::clone(factory))
}

/// Initialize logging for tests if not already initialized
///
/// This sets up tracing with appropriate filters for test output.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("keypool_pool=info".parse().unwrap())
                    .add_directive("keypool_tests=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_counts_handles() {
        let factory = TableFactory::new();
        let key = ResourceKey::new("orders");

        let handle = factory.create(&key).await.expect("create");
        assert_eq!(handle.table, "orders");
        assert_eq!(factory.live(), 1);

        factory.destroy(&key, handle).await.expect("destroy");
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(factory.live(), 0);
    }

    #[tokio::test]
    async fn test_factory_failure_and_validation() {
        let factory = TableFactory::new();
        let key = ResourceKey::new("orders");

        let handle = factory.create(&key).await.expect("create");
        assert!(factory.validate(&key, &handle).await);
        factory.mark_invalid(handle.serial);
        assert!(!factory.validate(&key, &handle).await);

        factory.set_failing(true);
        let err = factory.create(&key).await.expect_err("offline");
        assert!(err.is_factory_failure());
    }

    #[test]
    fn test_handle_in_use_flag() {
        let handle = SimulatedTable {
            table: "orders".into(),
            serial: 0,
            in_use: AtomicBool::new(false),
        };
        assert!(handle.enter());
        assert!(!handle.enter());
        handle.leave();
        assert!(handle.enter());
    }
}
