//! Keyed cache of resource pools
//!
//! A [`PoolRegistry`] maps each resource key to one live [`ResourcePool`].
//! Pools are built on first access through a [`PoolLoader`], rebuilt once
//! their entry is older than the expiry window, and reloaded in the
//! background once older than the refresh window. When the registry holds
//! more than `max_entries` pools, the least recently used one is retired.
//!
//! # Example
//!
//! ```ignore
//! use keypool_pool::{PoolConfig, PoolRegistry, RegistryConfig};
//!
//! let registry = PoolRegistry::new(RegistryConfig::default(), PoolConfig::default(), factory);
//!
//! let pool = registry.get("orders").await?;
//! let lease = pool.borrow(Duration::from_secs(2)).await?;
//! // Use the handle...
//! registry.recycle(lease)?;
//!
//! registry.shutdown().await;
//! ```
//!
//! [`ResourcePool`]: crate::pool::ResourcePool

mod config;
mod entry;
mod loader;
mod registry;


pub use config::RegistryConfig;
pub use entry::{PoolEntry, RegistryEntryInfo, RegistryStats};
pub use loader::{FactoryLoader, PoolLoader};
pub use registry::PoolRegistry;
