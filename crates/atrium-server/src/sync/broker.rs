//! Session-keyed delta fan-out to connected surfaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use atrium_core::delta::{DeltaFrame, SessionDelta};

use super::connection::SurfaceConnection;
use crate::metrics::{SYNC_DROPPED_FRAMES_TOTAL, SYNC_PUBLISHES_TOTAL, WS_CONNECTIONS_ACTIVE};

/// Dropped frames tolerated before a slow connection is torn down.
pub const MAX_DROPPED_FRAMES: u64 = 100;

/// Heartbeat window: connections silent for longer are treated as dead.
pub const HEARTBEAT_WINDOW: Duration = Duration::from_secs(30);

/// Fans session deltas out to every surface subscribed to that session.
///
/// The broker holds no history. A frame is serialized once, offered to each
/// subscription in publish order, and forgotten; surfaces that missed
/// frames catch up through the store's `sinceSeq` query.
pub struct SyncBroker {
    /// Connected surfaces indexed by connection id.
    connections: RwLock<HashMap<String, Arc<SurfaceConnection>>>,
}

impl SyncBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection and bind it to a session.
    pub async fn subscribe(&self, connection: Arc<SurfaceConnection>, session_id: &str) {
        connection.bind_session(session_id.to_string());
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
    }

    /// Unbind a connection from its session. The connection stays
    /// registered until it disconnects or is reaped.
    pub async fn unsubscribe(&self, connection_id: &str) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(connection_id) {
            conn.clear_session();
        }
    }

    /// Drop a connection entirely (socket closed).
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
    }

    /// Publish a delta to every surface subscribed to the session.
    /// Returns the number of frames delivered; 0 with no subscribers is a
    /// normal no-op.
    pub async fn publish(&self, session_id: &str, delta: &SessionDelta) -> usize {
        self.publish_frame(&DeltaFrame::new(session_id, delta.clone()))
            .await
    }

    /// Publish an already-enveloped frame, preserving its timestamp.
    pub async fn publish_frame(&self, frame: &DeltaFrame) -> usize {
        let json = match serde_json::to_string(frame) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(kind = frame.delta.kind(), error = %e, "failed to serialize delta frame");
                return 0;
            }
        };
        counter!(SYNC_PUBLISHES_TOTAL, "kind" => frame.delta.kind()).increment(1);

        let mut delivered = 0;
        let mut slow: Vec<String> = Vec::new();
        {
            let conns = self.connections.read().await;
            for conn in conns.values() {
                if conn.session_id().as_deref() != Some(frame.session_id.as_str()) {
                    continue;
                }
                if conn.send(json.clone()) {
                    delivered += 1;
                } else {
                    counter!(SYNC_DROPPED_FRAMES_TOTAL).increment(1);
                    if conn.drop_count() > MAX_DROPPED_FRAMES {
                        slow.push(conn.id.clone());
                    }
                }
            }
        }
        debug!(
            session_id = %frame.session_id,
            kind = frame.delta.kind(),
            delivered,
            "published delta"
        );

        for conn_id in slow {
            warn!(conn_id, "tearing down slow surface connection");
            self.remove(&conn_id).await;
        }
        delivered
    }

    /// Remove connections idle past `window`; returns their ids.
    pub async fn reap_idle(&self, window: Duration) -> Vec<String> {
        let mut conns = self.connections.write().await;
        let dead: Vec<String> = conns
            .values()
            .filter(|c| c.idle() > window)
            .map(|c| c.id.clone())
            .collect();
        for id in &dead {
            warn!(conn_id = %id, "reaping idle surface connection");
            let _ = conns.remove(id);
        }
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
        dead
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connections currently bound to a session.
    pub async fn session_connections(&self, session_id: &str) -> Vec<Arc<SurfaceConnection>> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|c| c.session_id().as_deref() == Some(session_id))
            .cloned()
            .collect()
    }
}

impl Default for SyncBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::messages::Message;
    use tokio::sync::mpsc;

    fn connection(id: &str, capacity: usize) -> (Arc<SurfaceConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(SurfaceConnection::new(id.into(), "main".into(), tx)),
            rx,
        )
    }

    fn typing(active: bool) -> SessionDelta {
        SessionDelta::Typing {
            surface: "assistant".into(),
            active,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let broker = SyncBroker::new();
        assert_eq!(broker.publish("sess_1", &typing(true)).await, 0);
    }

    #[tokio::test]
    async fn delivers_frames_in_publish_order() {
        let broker = SyncBroker::new();
        let (conn, mut rx) = connection("conn_1", 32);
        broker.subscribe(conn, "sess_1").await;

        for text in ["first", "second", "third"] {
            let delta = SessionDelta::Message(Message::user("sess_1", text, "main"));
            assert_eq!(broker.publish("sess_1", &delta).await, 1);
        }

        for expected in ["first", "second", "third"] {
            let frame = rx.recv().await.unwrap();
            let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(json["sessionId"], "sess_1");
            assert_eq!(json["type"], "message");
            assert_eq!(json["data"]["content"], expected);
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        // A surface watching one session never sees another session's deltas.
        let broker = SyncBroker::new();
        let (on_s, mut rx_s) = connection("conn_s", 32);
        let (on_t, mut rx_t) = connection("conn_t", 32);
        broker.subscribe(on_s, "sess_s").await;
        broker.subscribe(on_t, "sess_t").await;

        let delta = SessionDelta::Message(Message::user("sess_s", "for s only", "main"));
        assert_eq!(broker.publish("sess_s", &delta).await, 1);

        let frame = rx_s.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["sessionId"], "sess_s");
        assert!(rx_t.try_recv().is_err());
    }

    #[tokio::test]
    async fn all_subscribers_of_a_session_receive() {
        let broker = SyncBroker::new();
        let (main, mut rx_main) = connection("conn_main", 32);
        let (floating, mut rx_floating) = connection("conn_float", 32);
        broker.subscribe(main, "sess_1").await;
        broker.subscribe(floating, "sess_1").await;

        assert_eq!(broker.publish("sess_1", &typing(true)).await, 2);
        assert!(rx_main.recv().await.is_some());
        assert!(rx_floating.recv().await.is_some());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_but_keeps_the_connection() {
        let broker = SyncBroker::new();
        let (conn, mut rx) = connection("conn_1", 32);
        broker.subscribe(conn, "sess_1").await;
        broker.unsubscribe("conn_1").await;

        assert_eq!(broker.publish("sess_1", &typing(true)).await, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.connection_count().await, 1);
    }

    #[tokio::test]
    async fn slow_connection_is_torn_down_past_the_drop_cap() {
        let broker = SyncBroker::new();
        let (conn, _rx) = connection("conn_slow", 1);
        broker.subscribe(conn, "sess_1").await;

        // One frame fits the channel; everything after that drops. The
        // connection goes once its drops exceed the cap.
        for _ in 0..(MAX_DROPPED_FRAMES + 2) {
            let _ = broker.publish("sess_1", &typing(true)).await;
        }
        assert_eq!(broker.connection_count().await, 0);
    }

    #[tokio::test]
    async fn healthy_subscribers_survive_a_slow_peer() {
        let broker = SyncBroker::new();
        let (slow, _rx_slow) = connection("conn_slow", 1);
        let (healthy, mut rx_ok) = connection("conn_ok", 1024);
        broker.subscribe(slow, "sess_1").await;
        broker.subscribe(healthy, "sess_1").await;

        for _ in 0..(MAX_DROPPED_FRAMES + 2) {
            let _ = broker.publish("sess_1", &typing(true)).await;
        }
        assert_eq!(broker.connection_count().await, 1);
        assert!(rx_ok.recv().await.is_some());
    }

    #[tokio::test]
    async fn reap_idle_removes_stale_connections() {
        let broker = SyncBroker::new();
        let (stale, _rx1) = connection("conn_stale", 32);
        let (fresh, _rx2) = connection("conn_fresh", 32);
        stale.backdate(Duration::from_secs(45));
        broker.subscribe(stale, "sess_1").await;
        broker.subscribe(fresh, "sess_1").await;

        let reaped = broker.reap_idle(HEARTBEAT_WINDOW).await;
        assert_eq!(reaped, vec!["conn_stale".to_string()]);
        assert_eq!(broker.connection_count().await, 1);
        assert_eq!(broker.session_connections("sess_1").await[0].id, "conn_fresh");
    }
}
