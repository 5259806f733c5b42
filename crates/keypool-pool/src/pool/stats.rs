//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Statistics about a resource pool's current state
///
/// `total` counts idle and active handles plus creations in flight, so it
/// never exceeds the pool's `max_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Handles owned by the pool (idle + active + being created)
    total: usize,
    /// Handles available for borrowing
    idle: usize,
    /// Handles currently lent out
    active: usize,
    /// Borrowers waiting for capacity
    waiting: usize,
    /// Handles created over the pool's lifetime
    created: u64,
    /// Handles destroyed over the pool's lifetime
    destroyed: u64,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self {
            total,
            idle,
            active,
            waiting,
            created: 0,
            destroyed: 0,
        }
    }

    /// Attach lifetime counters
    pub fn with_lifetime_counts(mut self, created: u64, destroyed: u64) -> Self {
        self.created = created;
        self.destroyed = destroyed;
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    /// Share of handles currently lent out (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Check if every handle is lent out
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.total > 0 && self.active == self.total
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}
