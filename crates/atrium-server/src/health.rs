//! `/v1/health` endpoint body.

use serde::Serialize;

use atrium_resilience::CircuitSnapshot;

use crate::state::AppState;

/// Health check response body.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` with all circuits closed, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered surface connections.
    pub connections: usize,
    /// Turns currently in flight.
    pub active_turns: usize,
    /// Guarded dependency failures since startup.
    pub total_errors: u64,
    /// Per-dependency circuit state, sorted by key.
    pub circuits: Vec<CircuitSnapshot>,
    /// Per-model health flags.
    pub models: Vec<ModelHealth>,
}

/// One model's health flag.
#[derive(Clone, Debug, Serialize)]
pub struct ModelHealth {
    /// Model id.
    pub id: String,
    /// Whether the model's provider passed its last probe.
    pub healthy: bool,
}

/// Build a health response from live counters.
pub async fn health_check(state: &AppState) -> HealthResponse {
    let circuits = state.resilience.snapshot();
    let open_count = state.resilience.open_count();
    let models = state
        .models
        .list_available()
        .into_iter()
        .map(|d| ModelHealth {
            id: d.id,
            healthy: d.healthy,
        })
        .collect();

    HealthResponse {
        status: if open_count == 0 { "ok" } else { "degraded" }.into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: state.broker.connection_count().await,
        active_turns: state.orchestrator.active_turns(),
        total_errors: state.resilience.total_errors(),
        circuits,
        models,
    }
}
