//! # Reload Coordination
//!
//! Synchronizes bus-connection rotation with subscription lifecycle.
//!
//! When the connection resource refreshes, every dependent service must
//! stop consuming before the old connection is invalidated and resume
//! only after a new one is resolvable. The handshake is a per-service
//! channel pair, so services rotate independently and the container
//! never blocks beyond one service's own send:
//!
//! ```text
//! refresh listener ──RELOADING──▶ monitor: shutdown(), ack READY
//!        (holds the swap until READY)
//! container swaps the singleton
//! refresh listener ──RELOADED──▶ monitor: configure(true), start()
//! ```

use tokio::sync::{mpsc, Mutex};

/// Protocol states exchanged between a service and its monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    /// Ack: the monitor finished shutting the service down.
    Ready,
    /// The connection is about to rotate; stop consuming.
    Reloading,
    /// The rotation is complete; reconfigure and resume.
    Reloaded,
    /// Ack: shutting down failed; the swap proceeds regardless.
    Error,
}

/// The monitor's side of the handshake, taken once by the bootstrapper.
pub struct ReloadHandle {
    events: mpsc::Receiver<ReloadState>,
    acks: mpsc::Sender<ReloadState>,
}

impl ReloadHandle {
    /// Await the next protocol event from the service.
    ///
    /// Returns `None` when the service side is gone.
    pub async fn next(&mut self) -> Option<ReloadState> {
        self.events.recv().await
    }

    /// Acknowledge a `Reloading` event. Returns `false` when the
    /// service side is gone.
    pub async fn ack(&self, state: ReloadState) -> bool {
        self.acks.send(state).await.is_ok()
    }
}

/// The service's side of the handshake.
pub(crate) struct ServiceChannels {
    pub(crate) events_tx: mpsc::Sender<ReloadState>,
    pub(crate) acks_rx: std::sync::Arc<Mutex<mpsc::Receiver<ReloadState>>>,
}

/// Build the channel pair. Capacity 1: a send parks until the peer is
/// keeping up, which is the point of the handshake.
pub(crate) fn reload_channel() -> (ServiceChannels, ReloadHandle) {
    let (events_tx, events_rx) = mpsc::channel(1);
    let (acks_tx, acks_rx) = mpsc::channel(1);
    (
        ServiceChannels {
            events_tx,
            acks_rx: std::sync::Arc::new(Mutex::new(acks_rx)),
        },
        ReloadHandle {
            events: events_rx,
            acks: acks_tx,
        },
    )
}
