//! # Quasar Trace - Per-Request Execution Context
//!
//! Purely observational: an [`ExecutionContext`] is created per inbound
//! request, emits field-structured `tracing` events over the request's
//! lifetime, and logs completion with elapsed time when closed or
//! dropped.
//!
//! The [`ExecutionContext::on_failure`] hook is the seam for the
//! panic-recovery path: the service registers a callback that emits the
//! recovery reply, and [`ExecutionContext::recovered`] invokes it when a
//! handler panic is caught.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod context;

pub use context::{ExecutionContext, FailureHook};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
