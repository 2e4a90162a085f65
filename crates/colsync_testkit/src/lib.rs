//! # colsync Testkit
//!
//! Test utilities for colsync.
//!
//! This crate provides:
//! - A loopback [`StorageClient`](colsync_engine::StorageClient) that talks
//!   to the in-process reference server
//! - A sync harness with seeded remote collections and local stores
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use colsync_testkit::prelude::*;
//!
//! #[test]
//! fn downloads_everything() {
//!     let harness = SyncHarness::new();
//!     harness.seed_history(&sample_places(10));
//!     let mut history = harness.history_synchronizer();
//!     let (status, _) = harness.sync_history(&mut history);
//!     assert!(status.is_completed());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod loopback;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_tracing;
    pub use crate::loopback::*;
}

pub use fixtures::*;
pub use generators::*;
pub use loopback::*;

/// Installs a test-friendly tracing subscriber.
///
/// Honours `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
