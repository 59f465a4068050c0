//! Bridges the orchestrator's broadcast channel into the broker.

use std::sync::Arc;

use tokio::sync::broadcast;

use atrium_core::delta::DeltaFrame;

use super::broker::SyncBroker;

/// Drains delta frames from the runtime emitter into [`SyncBroker`].
pub struct EventBridge {
    rx: broadcast::Receiver<DeltaFrame>,
    broker: Arc<SyncBroker>,
}

impl EventBridge {
    /// Create a bridge over an emitter subscription.
    #[must_use]
    pub fn new(rx: broadcast::Receiver<DeltaFrame>, broker: Arc<SyncBroker>) -> Self {
        Self { rx, broker }
    }

    /// Run the bridge loop. Exits when the emitter is dropped.
    #[tracing::instrument(skip_all, name = "event_bridge")]
    pub async fn run(mut self) {
        loop {
            match self.rx.recv().await {
                Ok(frame) => {
                    let _ = self.broker.publish_frame(&frame).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Dropped frames are recovered via the catch-up query.
                    tracing::warn!(lagged = n, "event bridge lagged behind the emitter");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event bridge: emitter closed, exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connection::SurfaceConnection;
    use atrium_core::delta::SessionDelta;
    use atrium_core::messages::Message;
    use atrium_runtime::EventEmitter;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn frames_flow_from_emitter_to_surfaces() {
        let emitter = EventEmitter::new();
        let broker = Arc::new(SyncBroker::new());
        let bridge = EventBridge::new(emitter.subscribe(), broker.clone());
        let handle = tokio::spawn(bridge.run());

        let (tx, mut rx) = mpsc::channel(32);
        let conn = Arc::new(SurfaceConnection::new("conn_1".into(), "main".into(), tx));
        broker.subscribe(conn, "sess_1").await;

        let msg = Message::user("sess_1", "bridged", "main");
        let _ = emitter.publish("sess_1", SessionDelta::Message(msg));

        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["sessionId"], "sess_1");
        assert_eq!(json["data"]["content"], "bridged");

        drop(emitter);
        handle.await.unwrap();
    }
}
