//! # Quasar Test Suite
//!
//! Unified test crate for cross-crate behavior.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Full-stack flows over container + bus + services
//!     ├── rpc_flows.rs      # round trips, caching, fan-out
//!     └── reload_rotation.rs # zero-downtime connection rotation
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p quasar-tests
//!
//! # By category
//! cargo test -p quasar-tests integration::
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
