//! # Quasar Container - Dependency-Scoped Resources
//!
//! A named resource registry with three lifecycle policies and hot-swap
//! notification.
//!
//! ## Lifecycles
//!
//! - **Singleton** - the factory runs at most once per generation; all
//!   resolvers share the resulting instance (or its captured error).
//! - **Transient** - every resolve runs the factory fresh.
//! - **Scoped** - one instance per caller-supplied scope id, evicted by a
//!   TTL timer independent of callers.
//!
//! ## Hot Swap
//!
//! [`Container::refresh_singleton`] atomically replaces a singleton's
//! factory/instance pair. Listeners registered via
//! [`Container::on_refresh`] observe a `Refreshing` event before the swap
//! and a `Refreshed` event after it; a listener may hold the `Refreshing`
//! phase until its dependents have quiesced, which is how services drain
//! before a bus connection rotates out from under them.
//!
//! ## Concurrency
//!
//! The registries are concurrent maps; no coarse lock is held while a
//! factory executes, so unrelated resources construct independently. The
//! singleton guard is per-entry.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod container;
pub mod error;

// Re-export main types
pub use container::{Container, RefreshEvent, RefreshListener};
pub use error::ContainerError;
