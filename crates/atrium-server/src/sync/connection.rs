//! Surface connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Milliseconds since the Unix epoch.
fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// One connected surface (main dashboard, floating assistant, mobile, …).
///
/// A connection is bound to at most one session at a time; rebinding via a
/// new `subscribe` frame replaces the previous binding. Delivery is
/// at-least-once per connection: `send` never blocks, and a surface that
/// falls behind drops frames and recovers through the catch-up query.
pub struct SurfaceConnection {
    /// Unique connection id (`conn_…`).
    pub id: String,
    /// Surface label supplied at connect time.
    pub surface: String,
    /// Bound session id, set by a `subscribe` frame.
    session_id: Mutex<Option<String>>,
    /// Channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Last ping (or connect) in epoch milliseconds.
    last_seen_ms: AtomicU64,
    /// Frames dropped because the outbound channel was full.
    dropped_frames: AtomicU64,
}

impl SurfaceConnection {
    /// Create a connection over its outbound channel.
    #[must_use]
    pub fn new(id: String, surface: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            surface,
            session_id: Mutex::new(None),
            tx,
            last_seen_ms: AtomicU64::new(epoch_ms()),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a session, replacing any previous binding.
    pub fn bind_session(&self, session_id: String) {
        *self.session_id.lock() = Some(session_id);
    }

    /// Clear the session binding.
    pub fn clear_session(&self) {
        *self.session_id.lock() = None;
    }

    /// Current bound session id.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Send a serialized frame to the surface.
    ///
    /// Returns `false` when the channel is full or closed; the dropped
    /// frame counter is incremented and the frame is lost.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize a JSON value and send it.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total frames dropped on this connection.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Refresh liveness (ping received).
    pub fn touch(&self) {
        self.last_seen_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    /// Time since the last ping or connect.
    #[must_use]
    pub fn idle(&self) -> Duration {
        let last = self.last_seen_ms.load(Ordering::Relaxed);
        Duration::from_millis(epoch_ms().saturating_sub(last))
    }

    /// Move `last_seen` into the past for idle-reaping tests.
    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        let last = self.last_seen_ms.load(Ordering::Relaxed);
        self.last_seen_ms.store(
            last.saturating_sub(u64::try_from(by.as_millis()).unwrap_or(u64::MAX)),
            Ordering::Relaxed,
        );
    }
}
