//! HTTP surface: turn submission, model management, catch-up, health.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use atrium_core::delta::SessionDelta;
use atrium_core::messages::Message;
use atrium_llm::{Capability, ModelDescriptor, ModelTier, RegistryError, Validation};
use atrium_runtime::{OrchestratorError, TurnOutcome, TurnRequest};
use atrium_store::StoreError;

use crate::health::{self, HealthResponse};
use crate::state::AppState;
use crate::ws;

/// Build the axum router over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/v1/turns", post(submit_turn))
        .route("/v1/turns/cancel", post(cancel_turn))
        .route("/v1/models", get(list_models))
        .route("/v1/models/validate", post(validate_model))
        .route("/v1/models/switch", post(switch_model))
        .route("/v1/sessions/{id}/messages", get(session_messages))
        .route("/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// JSON error body with an HTTP status.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::SessionBusy(_) | OrchestratorError::Cancelled => {
                StatusCode::CONFLICT
            }
            OrchestratorError::Store(_) | OrchestratorError::Internal(_) => {
                warn!(error = %err, "turn failed before acceptance");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            _ => {
                warn!(error = %err, "store failure in handler");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::UnknownModel(_) => StatusCode::NOT_FOUND,
            RegistryError::UnhealthyModel(_) => StatusCode::CONFLICT,
            RegistryError::NoHealthyModel { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::NoBackend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// `POST /v1/turns`
async fn submit_turn(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let outcome = state.orchestrator.run_turn(request).await?;
    Ok(Json(outcome))
}

/// `POST /v1/turns/cancel` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelTurnRequest {
    session_id: String,
}

/// `POST /v1/turns/cancel`
async fn cancel_turn(
    State(state): State<AppState>,
    Json(request): Json<CancelTurnRequest>,
) -> Json<serde_json::Value> {
    let cancelled = state.orchestrator.cancel(&request.session_id);
    Json(json!({ "cancelled": cancelled }))
}

/// `GET /v1/models`
async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelDescriptor>> {
    Json(state.models.list_available())
}

/// `POST /v1/models/validate` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateModelRequest {
    model_id: Option<String>,
    #[serde(default)]
    capability_requirements: std::collections::BTreeSet<Capability>,
    #[serde(default)]
    caller_tier: ModelTier,
}

/// `POST /v1/models/validate`
async fn validate_model(
    State(state): State<AppState>,
    Json(request): Json<ValidateModelRequest>,
) -> Result<Json<Validation>, ApiError> {
    let validation = state.models.validate(
        request.model_id.as_deref(),
        &request.capability_requirements,
        request.caller_tier,
    )?;
    Ok(Json(validation))
}

/// `POST /v1/models/switch` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchModelRequest {
    session_id: String,
    from: String,
    to: String,
}

/// `POST /v1/models/switch`
///
/// Validates the target, pins it on the session row, and announces the
/// switch to every subscribed surface.
async fn switch_model(
    State(state): State<AppState>,
    Json(request): Json<SwitchModelRequest>,
) -> Result<Json<ModelDescriptor>, ApiError> {
    let descriptor =
        state
            .models
            .switch_active_model(&request.session_id, &request.from, &request.to)?;
    state
        .store
        .set_active_model(&request.session_id, &descriptor.id)?;
    let _ = state.emitter.publish(
        &request.session_id,
        SessionDelta::System {
            note: format!("active model switched from {} to {}", request.from, request.to),
        },
    );
    Ok(Json(descriptor))
}

/// `GET /v1/sessions/{id}/messages` query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesQuery {
    #[serde(default)]
    since_seq: u64,
}

/// `GET /v1/sessions/{id}/messages?sinceSeq=` — reconnect catch-up.
async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    if state.store.get_session(&session_id)?.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("session {session_id} not found"),
        ));
    }
    let messages = state.store.list_messages(&session_id, query.since_seq)?;
    Ok(Json(messages))
}

/// `GET /v1/health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(&state).await)
}

/// `GET /metrics`
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use atrium_llm::testutil::ScriptedBackend;
    use atrium_llm::{ModelBackend, ModelRegistry};
    use atrium_resilience::ResilienceRegistry;
    use atrium_runtime::{EventEmitter, Orchestrator, OrchestratorConfig};
    use atrium_store::connection::{ConnectionConfig, new_file};
    use atrium_store::migrations::run_migrations;
    use atrium_store::SessionStore;
    use atrium_tools::{DispatcherConfig, ToolDispatcher, ToolRegistry};

    use crate::sync::SyncBroker;

    fn descriptor(id: &str, provider: &str, healthy: bool) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            display_name: id.to_uppercase(),
            provider: provider.into(),
            capabilities: BTreeSet::new(),
            context_window: 128_000,
            input_price_per_mtok: 3.0,
            output_price_per_mtok: 15.0,
            tier: ModelTier::Standard,
            healthy,
        }
    }

    struct Harness {
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn harness(backend: Arc<dyn ModelBackend>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.db");
        let pool = new_file(path.to_str().unwrap(), &ConnectionConfig::default()).unwrap();
        let _ = run_migrations(&pool.get().unwrap()).unwrap();

        let store = Arc::new(SessionStore::new(pool));
        let resilience = Arc::new(ResilienceRegistry::with_defaults());
        let models = Arc::new(ModelRegistry::new(Arc::clone(&resilience)));
        models.register_model(descriptor("m1", backend.provider(), true));
        models.register_backend(backend);

        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(ToolRegistry::new()),
            Arc::clone(&resilience),
            DispatcherConfig::default(),
        ));
        let emitter = Arc::new(EventEmitter::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&models),
            dispatcher,
            Arc::clone(&resilience),
            Arc::clone(&emitter),
            OrchestratorConfig::default(),
        ));
        let state = AppState {
            orchestrator,
            store,
            models,
            resilience,
            broker: Arc::new(SyncBroker::new()),
            emitter,
            metrics: metrics_exporter_prometheus::PrometheusBuilder::new()
                .build_recorder()
                .handle(),
            start_time: Instant::now(),
        };
        Harness { state, _dir: dir }
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_turn_returns_the_assistant_answer() {
        let h = harness(Arc::new(
            ScriptedBackend::healthy("alpha").then_text("vacancy is down this quarter"),
        ));
        let app = router(h.state.clone());

        let response = app
            .oneshot(post(
                "/v1/turns",
                json!({
                    "ownerId": "owner_1",
                    "message": "how are my rentals doing?",
                    "originSurface": "main",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["sessionId"].as_str().unwrap().starts_with("sess_"));
        assert_eq!(body["assistantMessage"]["role"], "assistant");
        assert_eq!(
            body["assistantMessage"]["content"],
            "vacancy is down this quarter"
        );
        assert_eq!(body["metadata"]["modelUsed"], "m1");
    }

    #[tokio::test]
    async fn empty_message_is_a_bad_request() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app
            .oneshot(post(
                "/v1/turns",
                json!({
                    "ownerId": "owner_1",
                    "message": "   ",
                    "originSurface": "main",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("validation"));
    }

    #[tokio::test]
    async fn cancel_without_an_active_turn_reports_false() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app
            .oneshot(post("/v1/turns/cancel", json!({ "sessionId": "sess_x" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cancelled"], false);
    }

    #[tokio::test]
    async fn models_endpoint_lists_the_catalog() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app.oneshot(get_request("/v1/models")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["id"], "m1");
        assert_eq!(body[0]["healthy"], true);
    }

    #[tokio::test]
    async fn validate_substitutes_a_fallback_for_unknown_models() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app
            .oneshot(post("/v1/models/validate", json!({ "modelId": "ghost" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["valid"], false);
        assert_eq!(body["finalModel"]["id"], "m1");
        assert_eq!(body["fellBackFrom"], "ghost");
    }

    #[tokio::test]
    async fn validate_with_no_usable_model_is_unavailable() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        h.state.models.set_health("m1", false);
        let app = router(h.state.clone());

        let response = app
            .oneshot(post("/v1/models/validate", json!({ "modelId": "m1" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn switch_pins_the_model_and_announces_it() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        h.state
            .models
            .register_model(descriptor("m2", "alpha", true));
        let session = h
            .state
            .store
            .create_session("owner_1", None, None)
            .unwrap();
        let mut deltas = h.state.emitter.subscribe();
        let app = router(h.state.clone());

        let response = app
            .oneshot(post(
                "/v1/models/switch",
                json!({ "sessionId": session.id, "from": "m1", "to": "m2" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], "m2");
        assert_eq!(
            h.state
                .store
                .get_session(&session.id)
                .unwrap()
                .unwrap()
                .active_model
                .as_deref(),
            Some("m2")
        );
        let frame = deltas.recv().await.unwrap();
        assert_eq!(frame.session_id, session.id);
        assert_eq!(frame.delta.kind(), "system");
    }

    #[tokio::test]
    async fn switch_to_an_unknown_model_is_not_found() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let session = h
            .state
            .store
            .create_session("owner_1", None, None)
            .unwrap();
        let app = router(h.state.clone());

        let response = app
            .oneshot(post(
                "/v1/models/switch",
                json!({ "sessionId": session.id, "from": "m1", "to": "ghost" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn switch_on_an_unknown_session_is_not_found() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        h.state
            .models
            .register_model(descriptor("m2", "alpha", true));
        let app = router(h.state.clone());

        let response = app
            .oneshot(post(
                "/v1/models/switch",
                json!({ "sessionId": "sess_ghost", "from": "m1", "to": "m2" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("sess_ghost"));
    }

    #[tokio::test]
    async fn catch_up_returns_messages_after_since_seq() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let session = h
            .state
            .store
            .create_session("owner_1", None, None)
            .unwrap();
        for text in ["one", "two", "three"] {
            let _ = h
                .state
                .store
                .append_message(&Message::user(&session.id, text, "main"))
                .unwrap();
        }
        let app = router(h.state.clone());

        let uri = format!("/v1/sessions/{}/messages?sinceSeq=1", session.id);
        let response = app.oneshot(get_request(&uri)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let contents: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn catch_up_for_an_unknown_session_is_not_found() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app
            .oneshot(get_request("/v1/sessions/sess_ghost/messages"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok_with_closed_circuits() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app.oneshot(get_request("/v1/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeTurns"], 0);
        assert_eq!(body["totalErrors"], 0);
        assert_eq!(body["models"][0]["id"], "m1");
    }

    #[tokio::test]
    async fn turn_deltas_reach_a_subscribed_surface() {
        // A turn submitted by one surface is pushed to every other surface
        // watching the same session.
        let h = harness(Arc::new(
            ScriptedBackend::healthy("alpha").then_text("cap rates held steady"),
        ));
        let bridge = crate::sync::EventBridge::new(
            h.state.emitter.subscribe(),
            Arc::clone(&h.state.broker),
        );
        drop(tokio::spawn(bridge.run()));

        let session = h
            .state
            .store
            .create_session("owner_1", None, None)
            .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let watcher = Arc::new(crate::sync::SurfaceConnection::new(
            "conn_floating".into(),
            "floating".into(),
            tx,
        ));
        h.state.broker.subscribe(watcher, &session.id).await;

        let app = router(h.state.clone());
        let response = app
            .oneshot(post(
                "/v1/turns",
                json!({
                    "sessionId": session.id,
                    "ownerId": "owner_1",
                    "message": "any movement in cap rates?",
                    "originSurface": "main",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // user message, typing on, assistant message, typing off.
        let mut kinds = Vec::new();
        let mut saw_assistant = false;
        for _ in 0..4 {
            let frame = rx.recv().await.unwrap();
            let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(json["sessionId"], session.id.as_str());
            if json["type"] == "message" && json["data"]["role"] == "assistant" {
                assert_eq!(json["data"]["content"], "cap rates held steady");
                saw_assistant = true;
            }
            kinds.push(json["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["message", "typing", "message", "typing"]);
        assert!(saw_assistant);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let h = harness(Arc::new(ScriptedBackend::healthy("alpha")));
        let app = router(h.state.clone());

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
