//! # Quasar Bus - Subject-Addressed Messaging
//!
//! In-memory publish/subscribe transport connecting services.
//!
//! ## Delivery Model
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Publisher   │                    │ Subscriber A │  plain: every
//! │              │    publish()       ├──────────────┤  subscriber gets
//! │              │ ──────┐            │ Subscriber B │  a copy
//! └──────────────┘       │            └──────────────┘
//!                        ▼
//!                  ┌──────────────┐   ┌──────────────┐
//!                  │ InMemoryBus  │──▶│ queue "work" │  queue group: exactly
//!                  └──────────────┘   │  (1 of N)    │  one member per message
//!                                     └──────────────┘
//! ```
//!
//! ## Components
//!
//! - [`Envelope`] - the unit exchanged on the bus (subject, reply-to,
//!   headers, payload)
//! - [`InMemoryBus`] - the shared transport
//! - [`BusConnection`] - a rotatable handle onto the bus, with drain/close
//!   states and request/reply inboxes
//! - [`KvBucket`] - TTL-bounded, write-once key/value store for response
//!   caching

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod connection;
pub mod envelope;
pub mod kv;

// Re-export main types
pub use bus::{InMemoryBus, Subscription, SubscriptionHandle};
pub use connection::{BusConnection, BusError};
pub use envelope::{Envelope, Headers};
pub use kv::{KvBucket, KvError};

/// Maximum messages to buffer per subscriber before delivery drops.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Prefix for generated request/reply inbox subjects.
pub const INBOX_PREFIX: &str = "_INBOX.";
