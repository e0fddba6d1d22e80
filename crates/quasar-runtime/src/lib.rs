//! # Quasar Runtime - Service Bootstrapper
//!
//! Owns the set of registered services and their lifecycles.
//!
//! ## Boot Sequence
//!
//! 1. For each service: `configure(false)`, then `start()` - any failure
//!    aborts boot.
//! 2. One monitor task per service drives the reload protocol:
//!    `RELOADING` → shut down + ack `READY`; `RELOADED` → reconfigure +
//!    restart. A failure here is fatal at the process level, since a
//!    service without a valid bus connection cannot self-heal.
//! 3. [`Bootstrapper::run`] then waits for an interrupt (or a fatal
//!    monitor report) and shuts every service down.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bootstrap;
pub mod config;

// Re-export main types
pub use bootstrap::{BootError, Bootstrapper};
pub use config::RuntimeConfig;
