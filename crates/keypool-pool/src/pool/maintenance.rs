//! Idle eviction, idle validation and warm-floor top-up
//!
//! A maintenance run evicts idle handles unused for longer than the soft idle
//! threshold (never shrinking the idle set below `min_idle`), optionally
//! validates the remaining idle handles, then creates handles until the idle
//! set is back at `min_idle`.

use std::sync::Arc;

use keypool_core::HandleFactory;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use super::pool::{IdleHandle, Reservation, ResourcePool};

/// Outcome of a single maintenance run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Idle handles destroyed for exceeding the idle threshold
    pub evicted: usize,
    /// Idle handles destroyed for failing validation
    pub invalid: usize,
    /// Handles created to restore the idle floor
    pub created: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.evicted == 0 && self.invalid == 0 && self.created == 0
    }
}

impl<F: HandleFactory> ResourcePool<F> {
    /// Run eviction, idle validation (if `test_while_idle`) and top-up once
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let evicted = self.evict_idle().await;
        let invalid = if self.shared.config.test_while_idle() {
            self.validate_idle().await
        } else {
            0
        };
        let created = self.ensure_min_idle().await;

        let report = MaintenanceReport {
            evicted,
            invalid,
            created,
        };
        if !report.is_empty() {
            tracing::debug!(
                key = %self.shared.key,
                pool_id = %self.shared.id,
                evicted,
                invalid,
                created,
                "maintenance run"
            );
        }
        report
    }

    /// Destroy idle handles past the soft idle threshold, down to `min_idle`
    pub async fn evict_idle(&self) -> usize {
        let shared = &self.shared;
        let threshold = shared.config.soft_min_evictable_idle();
        let floor = shared.config.min_idle();

        let victims = {
            let mut state = shared.state.lock();
            if state.closed {
                return 0;
            }
            let now = Instant::now();
            let mut victims = Vec::new();
            // Front of the deque holds the longest-idle handle
            while state.idle.len() > floor {
                let expired = state
                    .idle
                    .front()
                    .is_some_and(|idle| now.duration_since(idle.last_used_at) > threshold);
                if !expired {
                    break;
                }
                if let Some(idle) = state.idle.pop_front() {
                    victims.push(idle);
                }
            }
            victims
        };

        let evicted = victims.len();
        for idle in victims {
            shared.destroy(idle.handle).await;
        }
        evicted
    }

    /// Validate every idle handle, destroying the ones that fail
    ///
    /// Handles under test are counted as active so borrowers cannot claim
    /// them and capacity stays accounted for.
    pub async fn validate_idle(&self) -> usize {
        let shared = &self.shared;
        let candidates: Vec<IdleHandle<F::Handle>> = {
            let mut state = shared.state.lock();
            if state.closed {
                return 0;
            }
            let candidates: Vec<_> = state.idle.drain(..).collect();
            for idle in &candidates {
                state.active.insert(idle.id);
            }
            candidates
        };

        let mut valid = Vec::with_capacity(candidates.len());
        let mut invalid = Vec::new();
        for idle in candidates {
            if shared.factory.validate(&shared.key, &idle.handle).await {
                valid.push(idle);
            } else {
                invalid.push(idle);
            }
        }

        let count = invalid.len();
        let rejected = {
            let mut state = shared.state.lock();
            for idle in valid.iter().chain(invalid.iter()) {
                state.active.remove(&idle.id);
            }
            if state.closed {
                valid.extend(invalid.drain(..));
                valid
            } else {
                // Original order is preserved ahead of handles returned meanwhile
                for idle in valid.into_iter().rev() {
                    state.idle.push_front(idle);
                }
                Vec::new()
            }
        };

        for idle in invalid.into_iter().chain(rejected) {
            shared.destroy(idle.handle).await;
            shared.available.notify_one();
        }
        count
    }

    /// Create handles until the idle set reaches `min_idle`
    ///
    /// Stops at `max_total`, when the pool closes, or at the first factory
    /// failure.
    pub async fn ensure_min_idle(&self) -> usize {
        let shared = &self.shared;
        let mut created = 0;

        loop {
            {
                let mut state = shared.state.lock();
                if state.closed
                    || state.idle.len() + state.creating >= shared.config.min_idle()
                    || state.total() >= shared.config.max_total()
                {
                    break;
                }
                state.creating += 1;
            }
            let reservation = Reservation::new(shared);

            let handle = match shared.factory.create(&shared.key).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(key = %shared.key, pool_id = %shared.id, error = %e, "failed to top up idle handles");
                    break;
                }
            };

            let id = shared.record_created();
            let rejected = {
                let mut state = shared.state.lock();
                reservation.commit(&mut state);
                if state.closed {
                    Some(handle)
                } else {
                    state
                        .idle
                        .push_back(IdleHandle::new(id, handle, Instant::now()));
                    None
                }
            };
            if let Some(handle) = rejected {
                shared.destroy(handle).await;
                break;
            }

            shared.available.notify_one();
            created += 1;
        }

        created
    }

    /// Spawn the periodic maintenance task on the current tokio runtime
    ///
    /// The first run happens immediately, then every `eviction_interval`.
    /// The task stops when the pool is closed or dropped. Returns false if no
    /// runtime is available.
    pub fn start_maintenance(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %self.shared.key, "no async runtime; pool maintenance disabled");
            return false;
        };

        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.eviction_interval();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let pool = ResourcePool { shared };
                if pool.is_closed() {
                    break;
                }
                pool.run_maintenance().await;
            }
        });

        if let Some(previous) = self.shared.maintenance.lock().replace(task) {
            previous.abort();
        }
        true
    }
}
