//! Registry entries and registry-level statistics

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keypool_core::{HandleFactory, ResourceKey};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::pool::{PoolStats, ResourcePool};

/// A pool cached under its key, with the times it was loaded and last written
pub struct PoolEntry<F: HandleFactory> {
    pool: ResourcePool<F>,
    created_at: Instant,
    last_write_at: Instant,
    loaded_at: DateTime<Utc>,
}

impl<F: HandleFactory> PoolEntry<F> {
    pub(super) fn new(pool: ResourcePool<F>) -> Self {
        let now = Instant::now();
        Self {
            pool,
            created_at: now,
            last_write_at: now,
            loaded_at: Utc::now(),
        }
    }

    /// Entry for a reloaded pool; keeps the original creation time
    pub(super) fn refreshed(&self, pool: ResourcePool<F>) -> Self {
        Self {
            pool,
            created_at: self.created_at,
            last_write_at: Instant::now(),
            loaded_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        self.pool.key()
    }

    pub fn pool(&self) -> &ResourcePool<F> {
        &self.pool
    }

    /// When the key was first loaded into the registry
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the current pool was installed
    pub fn last_write_at(&self) -> Instant {
        self.last_write_at
    }

    /// Wall-clock time the current pool was loaded
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Time since the current pool was installed
    pub fn age(&self) -> Duration {
        self.last_write_at.elapsed()
    }

    pub(super) fn info(&self) -> RegistryEntryInfo {
        RegistryEntryInfo {
            key: self.key().to_string(),
            pool_id: self.pool.id(),
            loaded_at: self.loaded_at,
            age_ms: self.age().as_millis() as u64,
            stats: self.pool.stats(),
        }
    }
}

impl<F: HandleFactory> Clone for PoolEntry<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            created_at: self.created_at,
            last_write_at: self.last_write_at,
            loaded_at: self.loaded_at,
        }
    }
}

impl<F: HandleFactory> fmt::Debug for PoolEntry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("key", self.key())
            .field("pool_id", &self.pool.id())
            .field("loaded_at", &self.loaded_at)
            .field("age", &self.age())
            .finish()
    }
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntryInfo {
    pub key: String,
    pub pool_id: Uuid,
    pub loaded_at: DateTime<Utc>,
    /// Milliseconds since the current pool was installed
    pub age_ms: u64,
    pub stats: PoolStats,
}

/// Lifetime counters of a registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Pools built on a miss or after expiry
    pub loads: u64,
    /// Foreground loads that failed
    pub load_failures: u64,
    /// Background reloads that replaced an entry
    pub refreshes: u64,
    /// Background reloads that failed
    pub refresh_failures: u64,
    /// Entries retired for exceeding the expiry window
    pub expirations: u64,
    /// Entries retired to stay within `max_entries`
    pub evictions: u64,
    /// Entries removed by explicit invalidation
    pub invalidations: u64,
    /// Entries currently held
    pub entries: usize,
}
