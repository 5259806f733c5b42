//! keypool Pool - Keyed resource pooling
//!
//! This crate provides per-key pools of expensive handles, the registry that
//! caches one pool per key with expiry and background refresh, and retry
//! helpers for callers that hit an exhausted pool.

mod config;
pub mod pool;
pub mod registry;
pub mod retry;

pub use config::KeypoolConfig;
pub use pool::{HandleId, Lease, MaintenanceReport, PoolConfig, PoolStats, ResourcePool};
pub use registry::{
    FactoryLoader, PoolEntry, PoolLoader, PoolRegistry, RegistryConfig, RegistryEntryInfo,
    RegistryStats,
};
pub use retry::{BackoffStrategy, RetryPolicy};

pub use keypool_core::{HandleFactory, KeypoolError, ResourceKey, Result};
