//! # Tessera Testkit
//!
//! Test utilities for Tessera.
//!
//! This crate provides:
//! - Test fixtures for in-memory and on-disk datasets
//! - A fault-injecting storage backend for crash tests
//! - Property-based test generators using proptest
//! - Scenario harnesses for durability and isolation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_dataset() {
//!     with_temp_dataset(|dataset| {
//!         dataset.write(|txn| txn.add(&ex("s"), &ex("p"), &ex("o")).map(|_| ()))?;
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scenarios::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use scenarios::*;
