//! Broadcast-based delta emitter.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use atrium_core::delta::{DeltaFrame, SessionDelta};

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Non-blocking fan-out of session deltas.
///
/// `publish` never awaits; slow receivers lag and drop frames rather than
/// blocking the orchestrator. Durable recovery is the store's catch-up
/// query, not this channel.
pub struct EventEmitter {
    tx: broadcast::Sender<DeltaFrame>,
    publish_count: AtomicU64,
}

impl EventEmitter {
    /// Emitter with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Emitter with a custom channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            publish_count: AtomicU64::new(0),
        }
    }

    /// Publish a delta for a session. Returns the number of receivers that
    /// got it; 0 with no subscribers is a normal no-op.
    pub fn publish(&self, session_id: &str, delta: SessionDelta) -> usize {
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(DeltaFrame::new(session_id, delta))
            .unwrap_or(0)
    }

    /// Subscribe to all frames published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeltaFrame> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total frames published since creation.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
