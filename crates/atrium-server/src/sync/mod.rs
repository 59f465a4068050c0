//! Surface connection management and session-keyed delta fan-out.

pub mod broker;
pub mod connection;
pub mod event_bridge;

pub use broker::{HEARTBEAT_WINDOW, MAX_DROPPED_FRAMES, SyncBroker};
pub use connection::SurfaceConnection;
pub use event_bridge::EventBridge;
