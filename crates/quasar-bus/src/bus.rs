//! # In-Memory Bus
//!
//! The shared transport: a subject registry with plain subscribers and
//! queue groups.
//!
//! Delivery rules:
//!
//! - Every plain subscriber on a subject receives its own copy.
//! - Each queue group on a subject delivers to exactly one member,
//!   rotating round-robin.
//! - Per-subscriber channels are bounded; when a subscriber falls behind,
//!   messages addressed to it are dropped with a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::kv::KvBucket;
use crate::DEFAULT_CHANNEL_CAPACITY;

struct SubEntry {
    id: u64,
    tx: mpsc::Sender<Envelope>,
}

struct QueueGroup {
    members: Vec<SubEntry>,
    next: AtomicUsize,
}

#[derive(Default)]
struct SubjectSubs {
    plain: Vec<SubEntry>,
    groups: HashMap<String, QueueGroup>,
}

impl SubjectSubs {
    fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.groups.is_empty()
    }
}

/// The in-memory message bus shared by all connections.
pub struct InMemoryBus {
    /// Subscriber registry keyed by subject.
    subjects: RwLock<HashMap<String, SubjectSubs>>,

    /// Key/value buckets, created on demand.
    buckets: RwLock<HashMap<String, Arc<KvBucket>>>,

    /// Next subscription id.
    next_id: AtomicU64,

    /// Total messages published.
    messages_published: AtomicU64,

    /// Per-subscriber channel capacity.
    capacity: usize,
}

impl InMemoryBus {
    /// Create a bus with the default per-subscriber capacity.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with a custom per-subscriber capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subjects: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            capacity,
        })
    }

    /// Publish an envelope to its subject.
    ///
    /// Returns the number of subscribers the message was delivered to.
    /// A message with no matching subscribers is dropped.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let subjects = self.subjects.read();
        let Some(subs) = subjects.get(&envelope.subject) else {
            debug!(subject = %envelope.subject, "Message dropped (no subscribers)");
            return 0;
        };

        let mut delivered = 0;

        for entry in &subs.plain {
            if Self::offer(entry, envelope.clone()) {
                delivered += 1;
            }
        }

        for (group, queue) in &subs.groups {
            if queue.members.is_empty() {
                continue;
            }
            // Round-robin starting point; walk forward past dead members.
            let start = queue.next.fetch_add(1, Ordering::Relaxed) % queue.members.len();
            for offset in 0..queue.members.len() {
                let idx = (start + offset) % queue.members.len();
                if Self::offer(&queue.members[idx], envelope.clone()) {
                    delivered += 1;
                    break;
                }
                debug!(
                    subject = %envelope.subject,
                    group = %group,
                    "Queue member unavailable, trying next"
                );
            }
        }

        delivered
    }

    fn offer(entry: &SubEntry, envelope: Envelope) -> bool {
        match entry.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(env)) => {
                warn!(
                    subject = %env.subject,
                    subscription = entry.id,
                    "Subscriber lagged, message dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Subscribe to a subject.
    ///
    /// With `queue = Some(group)` the subscription joins a queue group:
    /// each message on the subject is delivered to exactly one group member.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, subject: &str, queue: Option<&str>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let entry = SubEntry { id, tx };

        {
            let mut subjects = self.subjects.write();
            let subs = subjects.entry(subject.to_string()).or_default();
            match queue {
                Some(group) => {
                    subs.groups
                        .entry(group.to_string())
                        .or_insert_with(|| QueueGroup {
                            members: Vec::new(),
                            next: AtomicUsize::new(0),
                        })
                        .members
                        .push(entry);
                }
                None => subs.plain.push(entry),
            }
        }

        debug!(subject = %subject, queue = ?queue, id, "New subscription created");

        Subscription {
            handle: SubscriptionHandle {
                bus: Arc::downgrade(self),
                subject: subject.to_string(),
                queue: queue.map(str::to_string),
                id,
            },
            rx,
        }
    }

    pub(crate) fn unsubscribe(&self, subject: &str, queue: Option<&str>, id: u64) {
        let mut subjects = self.subjects.write();
        let Some(subs) = subjects.get_mut(subject) else {
            return;
        };

        match queue {
            Some(group) => {
                if let Some(q) = subs.groups.get_mut(group) {
                    q.members.retain(|e| e.id != id);
                    if q.members.is_empty() {
                        subs.groups.remove(group);
                    }
                }
            }
            None => subs.plain.retain(|e| e.id != id),
        }

        if subs.is_empty() {
            subjects.remove(subject);
        }
        debug!(subject = %subject, id, "Subscription removed");
    }

    /// Get or create a key/value bucket.
    ///
    /// An existing bucket keeps its original TTL; the `ttl` argument only
    /// applies on creation.
    #[must_use]
    pub fn key_value_bucket(
        &self,
        name: &str,
        ttl: Option<std::time::Duration>,
    ) -> Arc<KvBucket> {
        let mut buckets = self.buckets.write();
        Arc::clone(
            buckets
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(KvBucket::new(name, ttl))),
        )
    }

    /// Number of subscribers (plain and queue members) on a subject.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let subjects = self.subjects.read();
        subjects.get(subject).map_or(0, |s| {
            s.plain.len() + s.groups.values().map(|g| g.members.len()).sum::<usize>()
        })
    }

    /// Total messages published over the bus lifetime.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }
}

/// A subscription: the receiving side of a subject registration.
///
/// Dropping the subscription removes it from the bus.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// Receive the next envelope.
    ///
    /// Returns `None` once the subscription has been removed from the bus
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// The subject this subscription is bound to.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.handle.subject
    }

    /// A cloneable handle for unsubscribing from elsewhere.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Detached unsubscribe handle for a [`Subscription`].
#[derive(Clone)]
pub struct SubscriptionHandle {
    bus: Weak<InMemoryBus>,
    subject: String,
    queue: Option<String>,
    id: u64,
}

impl SubscriptionHandle {
    /// Remove the subscription from the bus. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.subject, self.queue.as_deref(), self.id);
        }
    }
}
