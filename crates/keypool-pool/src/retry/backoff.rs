//! Exponential backoff between borrow attempts

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with a cap and optional jitter
///
/// The delay before retry `n` (zero-based) is `base * factor^n`, capped at
/// `cap`. With jitter enabled the delay is drawn uniformly from the upper
/// half of that value, so concurrent borrowers spread out instead of waking
/// together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffStrategy {
    base_ms: u64,
    cap_ms: u64,
    factor: f64,
    jitter: bool,
}

impl BackoffStrategy {
    /// Create a backoff starting at `base_ms` and never exceeding `cap_ms`
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        let base_ms = base_ms.max(1);
        Self {
            base_ms,
            cap_ms: cap_ms.max(base_ms),
            factor: 2.0,
            jitter: false,
        }
    }

    /// Set the growth factor (clamped to at least 1.0)
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_ms as f64 * self.factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64) as u64
        } else {
            self.cap_ms
        };

        if !self.jitter || capped < 2 {
            return Duration::from_millis(capped);
        }
        let jittered = rand::thread_rng().gen_range(capped / 2..=capped);
        Duration::from_millis(jittered)
    }

    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for BackoffStrategy {
    /// 50ms doubling up to 5 seconds, no jitter
    fn default() -> Self {
        Self::new(50, 5_000)
    }
}
