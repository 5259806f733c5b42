//! Per-key resource pooling
//!
//! This module provides a bounded pool of interchangeable handles for a
//! single resource key, with borrow/return semantics, idle eviction and
//! blocking admission when the pool is saturated.
//!
//! # Example
//!
//! ```ignore
//! use keypool_pool::pool::{PoolConfig, ResourcePool};
//!
//! let config = PoolConfig::new(2, 10)
//!     .with_soft_min_evictable_idle_ms(60_000)
//!     .with_block_when_exhausted(true);
//!
//! let pool = ResourcePool::new("orders", config, table_factory);
//! let lease = pool.borrow(Duration::from_secs(2)).await?;
//! // Use the handle...
//! pool.release(lease)?;
//! ```

mod config;
mod lease;
mod maintenance;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use lease::{HandleId, Lease};
pub use maintenance::MaintenanceReport;
pub use pool::ResourcePool;
pub use stats::PoolStats;
