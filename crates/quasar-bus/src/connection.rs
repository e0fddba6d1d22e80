//! # Bus Connection
//!
//! A rotatable handle onto the shared bus. Services resolve a connection
//! from the resource container by name; rotating the resource means
//! constructing a fresh connection while the old one is drained.
//!
//! The connection tracks three states:
//!
//! ```text
//! Connected ──drain()──▶ Draining ──close()──▶ Closed
//!     └────────────────close()─────────────────────┘
//! ```
//!
//! Draining still accepts publishes (in-flight replies must go out) but
//! refuses new subscriptions. Closed refuses everything.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::bus::{InMemoryBus, Subscription};
use crate::envelope::{Envelope, Headers};
use crate::kv::KvBucket;
use crate::INBOX_PREFIX;

/// Errors from connection operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The connection is draining and refuses new subscriptions.
    #[error("connection is draining")]
    ConnectionDraining,

    /// A request did not receive a reply within its timeout.
    #[error("request to {subject} timed out after {timeout:?}")]
    RequestTimeout { subject: String, timeout: Duration },

    /// The reply inbox was torn down before a reply arrived.
    #[error("no response received for {subject}")]
    NoResponse { subject: String },
}

const CONNECTED: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// A handle onto the shared [`InMemoryBus`].
pub struct BusConnection {
    bus: Arc<InMemoryBus>,
    state: AtomicU8,
}

impl BusConnection {
    /// Open a new connection onto the bus.
    #[must_use]
    pub fn connect(bus: &Arc<InMemoryBus>) -> Self {
        Self {
            bus: Arc::clone(bus),
            state: AtomicU8::new(CONNECTED),
        }
    }

    /// Publish an envelope.
    ///
    /// Returns the number of subscribers the message reached.
    ///
    /// # Errors
    ///
    /// `BusError::ConnectionClosed` once [`close`](Self::close) has been
    /// called. A draining connection still publishes.
    pub fn publish(&self, envelope: Envelope) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::ConnectionClosed);
        }
        Ok(self.bus.publish(envelope))
    }

    /// Subscribe to a subject (every subscriber receives a copy).
    ///
    /// # Errors
    ///
    /// Fails once the connection is draining or closed.
    pub fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        self.check_open()?;
        Ok(self.bus.subscribe(subject, None))
    }

    /// Join a queue group on a subject (exactly one member per message).
    ///
    /// # Errors
    ///
    /// Fails once the connection is draining or closed.
    pub fn queue_subscribe(&self, subject: &str, queue: &str) -> Result<Subscription, BusError> {
        self.check_open()?;
        Ok(self.bus.subscribe(subject, Some(queue)))
    }

    /// Send a request and await the first reply on a generated inbox.
    ///
    /// # Errors
    ///
    /// `RequestTimeout` when no reply arrives within `timeout`;
    /// `NoResponse` when the inbox closes without a reply; connection
    /// state errors as for [`subscribe`](Self::subscribe).
    pub async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let inbox = format!("{INBOX_PREFIX}{}", Uuid::new_v4());
        let mut reply_sub = self.subscribe(&inbox)?;

        let mut envelope = Envelope::new(subject, payload).with_reply(&inbox);
        envelope.headers = headers;
        self.publish(envelope)?;

        match tokio::time::timeout(timeout, reply_sub.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(BusError::NoResponse {
                subject: subject.to_string(),
            }),
            Err(_) => Err(BusError::RequestTimeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    /// Get or create a key/value bucket through this connection.
    ///
    /// # Errors
    ///
    /// `BusError::ConnectionClosed` once the connection is closed.
    pub fn key_value(&self, bucket: &str, ttl: Option<Duration>) -> Result<Arc<KvBucket>, BusError> {
        if self.is_closed() {
            return Err(BusError::ConnectionClosed);
        }
        Ok(self.bus.key_value_bucket(bucket, ttl))
    }

    /// Mark the connection as draining. In-flight publishes still go out.
    pub fn drain(&self) {
        let _ = self.state.compare_exchange(
            CONNECTED,
            DRAINING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Close the connection. All further operations fail.
    pub fn close(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Whether the connection is draining.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.state.load(Ordering::Acquire) == DRAINING
    }

    /// Whether the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    fn check_open(&self) -> Result<(), BusError> {
        match self.state.load(Ordering::Acquire) {
            CLOSED => Err(BusError::ConnectionClosed),
            DRAINING => Err(BusError::ConnectionDraining),
            _ => Ok(()),
        }
    }
}
