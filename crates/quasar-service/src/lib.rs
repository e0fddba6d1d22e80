//! # Quasar Service - Bus RPC Engine
//!
//! Binds one handler function to one subject + queue group over the bus,
//! with per-request failure isolation, content-addressed response
//! caching, outcome fan-out, and zero-downtime rotation of the
//! underlying bus connection.
//!
//! ## Request Pipeline
//!
//! ```text
//! inbound ──▶ decode ──▶ cache lookup ──▶ handler ──▶ encode ──▶ cache create
//!               │hit: reply SUCCESS (cached)│                        │
//!               ▼                           ▼                        ▼
//!         FAIL:DECODE                  FAIL:HANDLE            reply SUCCESS
//!                                                              + fan-out
//! ```
//!
//! Every inbound message runs on its own task; a panic inside a handler
//! is caught at an explicit task-local boundary and reported as
//! `FAIL:RECOVERED` without touching sibling requests or the
//! subscription.
//!
//! ## Reload Protocol
//!
//! ```text
//! READY ─▶ RELOADING ─▶ (monitor shuts service down, acks READY)
//!       ─▶ RELOADED  ─▶ (monitor reconfigures + restarts) ─▶ READY
//! ```
//!
//! The handshake is a per-service channel pair, not a global lock;
//! services rotate independently.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod error;
pub mod hash;
pub mod reload;
pub mod service;
pub mod status;

// Re-export main types
pub use error::ServiceError;
pub use reload::{ReloadHandle, ReloadState};
pub use service::{RpcService, Service};
