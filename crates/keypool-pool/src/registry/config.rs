//! Registry configuration types

use std::time::Duration;

use keypool_core::{KeypoolError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the pool registry
///
/// Controls how long a pool entry stays servable and how many entries the
/// registry holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Time since last write after which an entry is rebuilt, in milliseconds
    expire_after_write_ms: u64,
    /// Time since last write after which an entry is reloaded in the
    /// background, in milliseconds (0 disables refresh)
    refresh_after_write_ms: u64,
    /// Maximum number of pools held at once
    max_entries: usize,
    /// Capacity hint for the key map
    initial_capacity: usize,
}

impl RegistryConfig {
    /// Create a registry configuration with the given expiry window
    pub fn new(expire_after_write_ms: u64) -> Self {
        Self {
            expire_after_write_ms,
            ..Self::default()
        }
    }

    /// Set the expiry window in milliseconds
    pub fn with_expire_after_write_ms(mut self, expire_ms: u64) -> Self {
        self.expire_after_write_ms = expire_ms;
        self
    }

    /// Set the refresh window in milliseconds (0 disables refresh)
    pub fn with_refresh_after_write_ms(mut self, refresh_ms: u64) -> Self {
        self.refresh_after_write_ms = refresh_ms;
        self
    }

    /// Set the maximum number of pools
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the key map capacity hint
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Check values, e.g. after deserialization
    pub fn validate(&self) -> Result<()> {
        if self.expire_after_write_ms == 0 {
            return Err(KeypoolError::Configuration(
                "registry.expire_after_write_ms must be greater than 0".into(),
            ));
        }
        if self.max_entries == 0 {
            return Err(KeypoolError::Configuration(
                "registry.max_entries must be greater than 0".into(),
            ));
        }
        if self.refresh_after_write_ms >= self.expire_after_write_ms {
            tracing::warn!(
                refresh_ms = self.refresh_after_write_ms,
                expire_ms = self.expire_after_write_ms,
                "refresh window is not shorter than the expiry window; entries will expire before they refresh"
            );
        }
        Ok(())
    }

    /// Get the expiry window as a Duration
    pub fn expire_after_write(&self) -> Duration {
        Duration::from_millis(self.expire_after_write_ms)
    }

    /// Get the refresh window, if refresh is enabled
    pub fn refresh_after_write(&self) -> Option<Duration> {
        (self.refresh_after_write_ms > 0).then(|| Duration::from_millis(self.refresh_after_write_ms))
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }
}

impl Default for RegistryConfig {
    /// Create a default registry configuration
    ///
    /// Defaults:
    /// - expire_after_write: 5 minutes
    /// - refresh_after_write: 1 minute
    /// - max_entries: 100
    /// - initial_capacity: 10
    fn default() -> Self {
        Self {
            expire_after_write_ms: 300_000, // 5 minutes
            refresh_after_write_ms: 60_000, // 1 minute
            max_entries: 100,
            initial_capacity: 10,
        }
    }
}
