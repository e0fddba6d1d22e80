//! # TTL Key/Value Buckets
//!
//! A write-once, time-bounded byte store backing per-service response
//! caching.
//!
//! ## Semantics
//!
//! - `create` never overwrites: a second create for a live key fails with
//!   [`KvError::AlreadyExists`].
//! - Entries expire after the bucket TTL; expired entries are dropped
//!   lazily on access and swept opportunistically on insert.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

/// Errors from bucket operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The key already holds a live value.
    #[error("key {key} already exists in bucket {bucket}")]
    AlreadyExists { bucket: String, key: String },
}

struct KvEntry {
    value: Vec<u8>,
    inserted: Instant,
}

struct Inner {
    entries: HashMap<String, KvEntry>,
    last_sweep: Instant,
}

/// A named, TTL-bounded key/value bucket.
pub struct KvBucket {
    name: String,
    ttl: Option<Duration>,
    inner: RwLock<Inner>,
}

impl KvBucket {
    /// Interval between opportunistic expiry sweeps.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

    pub(crate) fn new(name: &str, ttl: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            ttl,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry time-to-live, `None` for unbounded.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Look up a live value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                Some(entry) if !self.expired(entry) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but is stale: drop it under the write lock.
        let mut inner = self.inner.write();
        if inner.entries.get(key).is_some_and(|e| self.expired(e)) {
            inner.entries.remove(key);
            debug!(bucket = %self.name, key = %key, "Expired entry dropped");
        }
        None
    }

    /// Store a value for a key that has no live entry.
    ///
    /// # Errors
    ///
    /// [`KvError::AlreadyExists`] when the key holds an unexpired value.
    pub fn create(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let mut inner = self.inner.write();

        if inner.last_sweep.elapsed() > Self::SWEEP_INTERVAL {
            self.sweep(&mut inner);
        }

        let live = inner.entries.get(key).is_some_and(|e| !self.expired(e));
        if live {
            return Err(KvError::AlreadyExists {
                bucket: self.name.clone(),
                key: key.to_string(),
            });
        }

        inner.entries.insert(
            key.to_string(),
            KvEntry {
                value,
                inserted: Instant::now(),
            },
        );
        Ok(())
    }

    /// Number of stored entries, including not-yet-swept expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the bucket holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    fn expired(&self, entry: &KvEntry) -> bool {
        self.ttl.is_some_and(|ttl| entry.inserted.elapsed() >= ttl)
    }

    fn sweep(&self, inner: &mut Inner) {
        if let Some(ttl) = self.ttl {
            let before = inner.entries.len();
            inner.entries.retain(|_, e| e.inserted.elapsed() < ttl);
            let dropped = before - inner.entries.len();
            if dropped > 0 {
                debug!(bucket = %self.name, dropped, "Swept expired entries");
            }
        }
        inner.last_sweep = Instant::now();
    }
}
