//! # bisync Testkit
//!
//! Test utilities for bisync.
//!
//! This crate provides:
//! - An in-memory fake REST server implementing `Session`
//! - Engine fixtures wired to the fake server, and sample payloads
//! - An observer that records engine events
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bisync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_engine() {
//!     with_test_engine(|test| {
//!         let user = User::new(test.engine.clone(), USER_ID);
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_server;
pub mod fixtures;
pub mod generators;
pub mod observer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake_server::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::observer::*;
}

pub use fake_server::*;
pub use fixtures::*;
pub use generators::*;
pub use observer::*;
