//! # atrium-server
//!
//! The outward-facing surface: axum HTTP routes for turn submission, model
//! management, and catch-up, plus the WebSocket endpoint surfaces subscribe
//! to for live session deltas.
//!
//! Cross-surface synchronization lives in [`sync`]: the broker fans each
//! published delta out to every connection bound to the session, never
//! buffering history. A surface that reconnects (or drops frames) recovers
//! through `GET /v1/sessions/{id}/messages?sinceSeq=`, which is why at-least-
//! once, in-order delivery per connection is enough here.
//!
//! ## Crate Position
//!
//! Depends on: atrium-core, atrium-llm, atrium-resilience, atrium-runtime,
//! atrium-store.
//! Depended on by: atrium-agent.

#![deny(unsafe_code)]

pub mod health;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sync;
pub mod ws;

pub use routes::router;
pub use state::AppState;
pub use sync::{EventBridge, SurfaceConnection, SyncBroker};
