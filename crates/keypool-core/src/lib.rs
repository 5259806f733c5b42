//! keypool Core - Core abstractions for keyed resource pooling
//!
//! This crate provides the fundamental traits and types that the pool and
//! registry crates build on. It defines:
//!
//! - `HandleFactory` - Trait for creating, validating and destroying handles
//! - `ResourceKey` - Identity of a resource family (e.g. a table name)
//! - `KeypoolError` - Error taxonomy shared by every keypool crate

mod error;
mod factory;
mod key;

pub use error::{KeypoolError, Result};
pub use factory::HandleFactory;
pub use key::ResourceKey;
