//! Shared state handed to every axum handler.

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use atrium_llm::ModelRegistry;
use atrium_resilience::ResilienceRegistry;
use atrium_runtime::{EventEmitter, Orchestrator};
use atrium_store::SessionStore;

use crate::sync::SyncBroker;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Turn orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Session store, for catch-up queries and model pinning.
    pub store: Arc<SessionStore>,
    /// Model catalog.
    pub models: Arc<ModelRegistry>,
    /// Circuit registry, surfaced on `/v1/health`.
    pub resilience: Arc<ResilienceRegistry>,
    /// Surface fan-out.
    pub broker: Arc<SyncBroker>,
    /// Delta emitter, for deltas originating in handlers (model switches).
    pub emitter: Arc<EventEmitter>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}
