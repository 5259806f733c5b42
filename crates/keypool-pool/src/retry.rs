//! Retrying borrows that fail for lack of capacity
//!
//! A saturated pool answers with `Exhausted` or `Timeout`. Both are
//! recoverable, so callers may wait and try again; factory failures are not
//! retried.
//!
//! # Example
//!
//! ```ignore
//! use keypool_pool::retry::{BackoffStrategy, RetryPolicy};
//!
//! let policy = RetryPolicy::new(4, BackoffStrategy::new(50, 2_000).with_jitter(true));
//! let lease = registry
//!     .borrow_with_retry("orders", Duration::from_millis(500), &policy)
//!     .await?;
//! ```

mod backoff;
mod policy;


pub use backoff::BackoffStrategy;
pub use policy::RetryPolicy;
