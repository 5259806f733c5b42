//! Pool configuration types

use std::time::Duration;

use keypool_core::{KeypoolError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a resource pool
///
/// Controls pool sizing, admission behavior and idle eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle handles the evictor keeps warm
    min_idle: usize,
    /// Hard cap on handles (idle + active) for one key
    max_total: usize,
    /// Whether a borrow waits for a handle when the pool is saturated
    block_when_exhausted: bool,
    /// Default borrow timeout in milliseconds
    max_wait_ms: u64,
    /// Period of the background maintenance run in milliseconds
    eviction_interval_ms: u64,
    /// Idle time in milliseconds after which a handle above `min_idle` may be evicted
    soft_min_evictable_idle_ms: u64,
    /// Validate idle handles before lending them out
    test_on_borrow: bool,
    /// Validate idle handles during maintenance runs
    test_while_idle: bool,
}

impl PoolConfig {
    /// Create a new pool configuration with the given idle floor and capacity
    ///
    /// # Panics
    ///
    /// Panics if `min_idle > max_total` or if `max_total` is 0.
    pub fn new(min_idle: usize, max_total: usize) -> Self {
        assert!(
            max_total > 0,
            "max_total must be greater than 0, got {}",
            max_total
        );
        assert!(
            min_idle <= max_total,
            "min_idle ({}) cannot exceed max_total ({})",
            min_idle,
            max_total
        );

        Self {
            min_idle,
            max_total,
            block_when_exhausted: true,
            max_wait_ms: 30_000,                // 30 seconds
            eviction_interval_ms: 600_000,      // 10 minutes
            soft_min_evictable_idle_ms: 300_000, // 5 minutes
            test_on_borrow: true,
            test_while_idle: false,
        }
    }

    /// Set whether borrowers wait when the pool is saturated
    pub fn with_block_when_exhausted(mut self, block: bool) -> Self {
        self.block_when_exhausted = block;
        self
    }

    /// Set the default borrow timeout in milliseconds
    pub fn with_max_wait_ms(mut self, wait_ms: u64) -> Self {
        self.max_wait_ms = wait_ms;
        self
    }

    /// Set the maintenance period in milliseconds
    pub fn with_eviction_interval_ms(mut self, interval_ms: u64) -> Self {
        self.eviction_interval_ms = interval_ms;
        self
    }

    /// Set the soft idle threshold in milliseconds
    pub fn with_soft_min_evictable_idle_ms(mut self, idle_ms: u64) -> Self {
        self.soft_min_evictable_idle_ms = idle_ms;
        self
    }

    /// Set whether handles are validated before being lent out
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Set whether idle handles are validated during maintenance
    pub fn with_test_while_idle(mut self, test: bool) -> Self {
        self.test_while_idle = test;
        self
    }

    /// Check values that bypassed `new`, e.g. after deserialization
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(KeypoolError::Configuration(
                "pool.max_total must be greater than 0".into(),
            ));
        }
        if self.min_idle > self.max_total {
            return Err(KeypoolError::Configuration(format!(
                "pool.min_idle ({}) cannot exceed pool.max_total ({})",
                self.min_idle, self.max_total
            )));
        }
        if self.eviction_interval_ms == 0 {
            return Err(KeypoolError::Configuration(
                "pool.eviction_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the idle floor
    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    /// Get the handle cap
    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// Whether borrowers wait when saturated
    pub fn block_when_exhausted(&self) -> bool {
        self.block_when_exhausted
    }

    /// Get the default borrow timeout as a Duration
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Get the maintenance period as a Duration
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    /// Get the soft idle threshold as a Duration
    pub fn soft_min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.soft_min_evictable_idle_ms)
    }

    /// Whether handles are validated on borrow
    pub fn test_on_borrow(&self) -> bool {
        self.test_on_borrow
    }

    /// Whether idle handles are validated during maintenance
    pub fn test_while_idle(&self) -> bool {
        self.test_while_idle
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_idle: 10
    /// - max_total: 100
    /// - block_when_exhausted: true
    /// - max_wait: 30 seconds
    /// - eviction_interval: 10 minutes
    /// - soft_min_evictable_idle: 5 minutes
    fn default() -> Self {
        Self::new(10, 100)
    }
}
