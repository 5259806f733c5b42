//! keypool integration test suite
//!
//! Exercises pools and the registry through their public API with a
//! simulated table-client factory.
//!
//! # Test Categories
//!
//! - Pool admission: exhaustion, blocking with timeout, reuse, ownership
//! - Idle maintenance: eviction floor, validation, top-up
//! - Registry: single-flight loads, expiry, refresh, capacity, stale leases
//! - Property tests: capacity invariant under random operation sequences
//! - Stress: many callers sharing a small pool
//!
//! # Usage
//!
//! ```bash
//! cargo test -p keypool-tests
//!
//! # With pool and registry logs
//! RUST_LOG=keypool_pool=debug cargo test -p keypool-tests -- --nocapture
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fixtures;

#[cfg(test)]
pub mod pool_tests;

#[cfg(test)]
pub mod registry_tests;

#[cfg(test)]
pub mod property_tests;

#[cfg(test)]
pub mod stress_tests;
