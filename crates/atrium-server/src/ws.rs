//! WebSocket endpoint: surface subscriptions and liveness pings.
//!
//! Inbound frames are small control messages; all session data flows the
//! other way as serialized [`atrium_core::delta::DeltaFrame`]s.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use atrium_core::ids;

use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::state::AppState;
use crate::sync::{SurfaceConnection, SyncBroker};

/// Outbound frames buffered per connection before drops start.
const OUTBOUND_BUFFER: usize = 256;

/// Connect-time query parameters.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Surface label (`main`, `floating`, …).
    #[serde(default = "default_surface")]
    pub surface: String,
}

fn default_surface() -> String {
    "unknown".into()
}

/// Control frames sent by surfaces.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    /// Bind this connection to a session's delta stream.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        session_id: String,
    },
    /// Unbind without disconnecting.
    Unsubscribe,
    /// Liveness ping; answered with `{"type":"pong"}`.
    Ping,
}

/// `GET /ws` upgrade handler.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.surface))
}

async fn handle_socket(socket: WebSocket, state: AppState, surface: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(OUTBOUND_BUFFER);
    let conn = Arc::new(SurfaceConnection::new(
        ids::new_connection_id(),
        surface,
        tx,
    ));
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(conn_id = %conn.id, surface = %conn.surface, "surface connected");

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => handle_frame(&state.broker, &conn, text.as_str()).await,
            Message::Close(_) => break,
            // Protocol pings are answered by axum; binary frames have no
            // meaning on this endpoint.
            _ => {}
        }
    }

    state.broker.remove(&conn.id).await;
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    write_task.abort();
    info!(conn_id = %conn.id, dropped = conn.drop_count(), "surface disconnected");
}

/// Handle one inbound control frame.
async fn handle_frame(broker: &Arc<SyncBroker>, conn: &Arc<SurfaceConnection>, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id = %conn.id, error = %e, "unrecognized surface frame");
            let _ = conn.send_json(&json!({
                "type": "error",
                "message": "unrecognized frame",
            }));
            return;
        }
    };

    match frame {
        InboundFrame::Subscribe { session_id } => {
            debug!(conn_id = %conn.id, session_id, "surface subscribed");
            broker.subscribe(conn.clone(), &session_id).await;
            let _ = conn.send_json(&json!({
                "type": "subscribed",
                "sessionId": session_id,
            }));
        }
        InboundFrame::Unsubscribe => {
            broker.unsubscribe(&conn.id).await;
            let _ = conn.send_json(&json!({ "type": "unsubscribed" }));
        }
        InboundFrame::Ping => {
            conn.touch();
            let _ = conn.send_json(&json!({ "type": "pong" }));
        }
    }
}
