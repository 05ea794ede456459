//! # recsync testkit
//!
//! Test utilities for recsync.
//!
//! This crate provides:
//! - Sample domain types ([`Note`], [`Folder`]) declaring a syncable surface
//! - [`TestHarness`], an engine over a memory store and a memory service,
//!   with helpers for a second device sharing the same remote
//! - Property-based test generators using proptest
//! - Tracing setup honouring `RUST_LOG`
//!
//! ## Usage
//!
//! ```rust
//! use recsync_testkit::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let harness = TestHarness::new();
//! harness.put(&Note::new("n1", "Hello"));
//! assert!(harness.sync().await.is_success());
//! assert_eq!(harness.service.record_count(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
