//! The turn state machine.
//!
//! A turn moves `Idle → ModelResolving → Generating → ToolDispatching* →
//! Persisting → Published`, with `Failed` reachable from anywhere after the
//! user message is accepted. Suspension points are only the guarded model
//! call and the joined tool round; store writes are quick synchronous
//! SQLite transactions.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use atrium_core::delta::SessionDelta;
use atrium_core::errors::TurnError;
use atrium_core::invocations::ToolInvocation;
use atrium_core::messages::{Message, MessageMetadata, Role};
use atrium_llm::backend::ToolSpec;
use atrium_llm::{
    BackendError, BackendTurn, Capability, ChatTurn, GenerateRequest, ModelBackend,
    ModelDescriptor, ModelRegistry, Validation,
};
use atrium_resilience::{GuardError, ResilienceRegistry};
use atrium_store::{Session, SessionStore, StoreError};
use atrium_tools::ToolDispatcher;

use crate::emitter::EventEmitter;
use crate::types::{ExecutedTool, TurnMetadata, TurnOutcome, TurnRequest};

/// Orchestrator tuning.
#[derive(Clone, Copy, Debug)]
pub struct OrchestratorConfig {
    /// Hard deadline for one model generation step.
    pub model_timeout: Duration,
    /// Tool dispatch rounds allowed per turn.
    pub max_dispatch_rounds: u32,
    /// Total turns in flight across all sessions.
    pub max_concurrent_turns: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(60),
            max_dispatch_rounds: 3,
            max_concurrent_turns: 16,
        }
    }
}

/// Errors for turns that were never accepted. Anything after acceptance
/// becomes an apology message instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The session already has a turn in flight.
    #[error("session {0} already has a turn in flight")]
    SessionBusy(String),
    /// The request was malformed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The turn was cancelled before producing an answer.
    #[error("turn cancelled")]
    Cancelled,
    /// Store failure before the turn was accepted.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Internal wiring failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// What a model generation step can fail with inside the circuit guard.
/// Timeouts run through here so they count toward failure accounting.
#[derive(Debug)]
enum GenFailure {
    Timeout(Duration),
    Backend(BackendError),
}

impl std::fmt::Display for GenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenFailure::Timeout(d) => write!(f, "generation timed out after {}s", d.as_secs()),
            GenFailure::Backend(e) => write!(f, "{e}"),
        }
    }
}

struct GenOutput {
    text: String,
    invocations: Vec<ToolInvocation>,
    validation: Validation,
}

struct TurnGuard<'a> {
    active: &'a DashMap<String, CancellationToken>,
    session_id: String,
    _permit: OwnedSemaphorePermit,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let _ = self.active.remove(&self.session_id);
        gauge!("turns_active").decrement(1.0);
    }
}

/// Drives turns end to end. Sessions are independent: turns in different
/// sessions run fully parallel, a second turn on a busy session is
/// rejected.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    models: Arc<ModelRegistry>,
    dispatcher: Arc<ToolDispatcher>,
    resilience: Arc<ResilienceRegistry>,
    emitter: Arc<EventEmitter>,
    config: OrchestratorConfig,
    active: DashMap<String, CancellationToken>,
    turn_permits: Arc<Semaphore>,
}

impl Orchestrator {
    /// Wire up an orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        models: Arc<ModelRegistry>,
        dispatcher: Arc<ToolDispatcher>,
        resilience: Arc<ResilienceRegistry>,
        emitter: Arc<EventEmitter>,
        config: OrchestratorConfig,
    ) -> Self {
        let turn_permits = Arc::new(Semaphore::new(config.max_concurrent_turns.max(1)));
        Self {
            store,
            models,
            dispatcher,
            resilience,
            emitter,
            config,
            active: DashMap::new(),
            turn_permits,
        }
    }

    /// Request cancellation of a session's in-flight turn. Returns whether
    /// one was found.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.active.get(session_id) {
            info!(session_id, "cancelling in-flight turn");
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Number of turns currently in flight.
    #[must_use]
    pub fn active_turns(&self) -> usize {
        self.active.len()
    }

    /// Run one turn to completion.
    ///
    /// For every accepted user message this produces exactly one assistant
    /// message: the real answer, or an apology carrying an internal error
    /// code. Only pre-acceptance problems (bad input, busy session, store
    /// unavailable) and cancellation surface as `Err`.
    #[instrument(skip(self, request), fields(origin = %request.origin_surface))]
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, OrchestratorError> {
        let message_text = request.message.trim().to_string();
        if message_text.is_empty() {
            return Err(OrchestratorError::Validation("message is empty".into()));
        }
        if let Some(id) = &request.model_id {
            if id.is_empty() || id.contains(char::is_whitespace) {
                return Err(OrchestratorError::Validation(format!(
                    "malformed model id `{id}`"
                )));
            }
        }

        let session =
            self.store
                .create_session(&request.owner_id, None, request.session_id.as_deref())?;

        let permit = Arc::clone(&self.turn_permits)
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::Internal("turn semaphore closed".into()))?;
        let cancel = CancellationToken::new();
        match self.active.entry(session.id.clone()) {
            Entry::Occupied(_) => {
                return Err(OrchestratorError::SessionBusy(session.id));
            }
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(cancel.clone());
            }
        }
        let _guard = TurnGuard {
            active: &self.active,
            session_id: session.id.clone(),
            _permit: permit,
        };
        gauge!("turns_active").increment(1.0);

        let started = Instant::now();
        let user_msg = self.store.append_message(&Message::user(
            &session.id,
            &message_text,
            &request.origin_surface,
        ))?;
        let _ = self
            .emitter
            .publish(&session.id, SessionDelta::Message(user_msg));
        self.set_typing(&session.id, true);

        let result = self.drive(&request, &session, &cancel).await;
        let processing_ms = duration_ceil_ms(started.elapsed());
        histogram!("turn_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                let outcome = self.finish(&session, &request, output, processing_ms)?;
                counter!("turns_total", "outcome" => "succeeded").increment(1);
                Ok(outcome)
            }
            Err(TurnError::Cancelled) => {
                counter!("turns_total", "outcome" => "cancelled").increment(1);
                self.persist_cancelled(&session, &request, processing_ms)?;
                self.set_typing(&session.id, false);
                Err(OrchestratorError::Cancelled)
            }
            Err(err) => {
                counter!("turns_total", "outcome" => "failed").increment(1);
                let outcome = self.fail(&session, &request, &err, processing_ms)?;
                Ok(outcome)
            }
        }
    }

    /// ModelResolving → Generating → ToolDispatching loop.
    async fn drive(
        &self,
        request: &TurnRequest,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<GenOutput, TurnError> {
        let requested = request
            .model_id
            .as_deref()
            .or(session.active_model.as_deref());
        let validation = self
            .models
            .validate(
                requested,
                &request.capability_requirements,
                request.caller_tier,
            )
            .map_err(|e| TurnError::DependencyUnavailable(e.to_string()))?;
        let descriptor = validation.final_model.clone();
        let backend = self
            .models
            .backend_for(&descriptor)
            .map_err(|e| TurnError::DependencyUnavailable(e.to_string()))?;
        debug!(model = %descriptor.id, provider = %descriptor.provider, "model resolved");

        let mut conversation = self.load_conversation(&session.id)?;
        let tools: Vec<ToolSpec> = self
            .dispatcher
            .catalog()
            .into_iter()
            .map(|(name, description)| ToolSpec { name, description })
            .collect();

        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut partial_text: Option<String> = None;
        let mut rounds: u32 = 0;

        loop {
            let gen_request = GenerateRequest {
                model: descriptor.id.clone(),
                messages: conversation.clone(),
                tools: tools.clone(),
            };
            let mut turn = self
                .guarded_generate(&descriptor, backend.as_ref(), &gen_request, cancel)
                .await?;

            if let Some(content) = turn.content.take() {
                partial_text = Some(content);
            }
            if turn.is_final() {
                counter!("dispatch_rounds_total").increment(u64::from(rounds));
                return Ok(GenOutput {
                    text: partial_text.unwrap_or_default(),
                    invocations,
                    validation,
                });
            }
            if rounds >= self.config.max_dispatch_rounds {
                warn!(
                    session_id = %session.id,
                    rounds,
                    "dispatch round cap reached, finalizing with available text"
                );
                break;
            }

            let records = self
                .dispatcher
                .invoke_round(turn.tool_requests, &session.id, cancel)
                .await;
            if cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }
            for record in &records {
                conversation.push(Self::tool_result_turn(record));
            }
            invocations.extend(records);
            rounds += 1;
        }

        counter!("dispatch_rounds_total").increment(u64::from(rounds));
        Ok(GenOutput {
            text: partial_text.unwrap_or_else(|| {
                "I wasn't able to finish that analysis with the tool results I gathered. \
                 Please try again or narrow the question."
                    .to_string()
            }),
            invocations,
            validation,
        })
    }

    /// One generation step through the provider circuit, with the hard
    /// model timeout inside the guard so timeouts count as failures.
    async fn guarded_generate(
        &self,
        descriptor: &ModelDescriptor,
        backend: &dyn ModelBackend,
        gen_request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<BackendTurn, TurnError> {
        let key = format!("model:{}", descriptor.provider);
        let deadline = self.config.model_timeout;
        let op = async {
            match timeout(deadline, backend.generate(gen_request)).await {
                Ok(Ok(turn)) => Ok(turn),
                Ok(Err(err)) => Err(GenFailure::Backend(err)),
                Err(_) => Err(GenFailure::Timeout(deadline)),
            }
        };
        let guarded = self.resilience.guard(&key, op);

        tokio::select! {
            () = cancel.cancelled() => Err(TurnError::Cancelled),
            result = guarded => match result {
                Ok(turn) => Ok(turn),
                Err(GuardError::CircuitOpen { key }) => Err(TurnError::DependencyUnavailable(
                    format!("circuit open for {key}"),
                )),
                Err(GuardError::Inner(GenFailure::Timeout(d))) => Err(TurnError::Timeout(d)),
                Err(GuardError::Inner(GenFailure::Backend(err))) => {
                    Err(TurnError::DependencyUnavailable(err.to_string()))
                }
            },
        }
    }

    fn load_conversation(&self, session_id: &str) -> Result<Vec<ChatTurn>, TurnError> {
        let history = self
            .store
            .list_messages(session_id, 0)
            .map_err(|e| TurnError::Internal(e.to_string()))?;
        Ok(history
            .into_iter()
            .map(|msg| ChatTurn::new(msg.role, msg.content))
            .collect())
    }

    /// Tool results are fed back as system turns so the model can adapt.
    fn tool_result_turn(record: &ToolInvocation) -> ChatTurn {
        use atrium_core::invocations::InvocationOutcome;
        let content = match &record.outcome {
            InvocationOutcome::Succeeded { output } => {
                format!("Tool {} returned: {output}", record.name)
            }
            InvocationOutcome::Failed { error } => {
                format!("Tool {} failed: {error}", record.name)
            }
            InvocationOutcome::Pending => format!("Tool {} is still pending", record.name),
        };
        ChatTurn::new(Role::System, content)
    }

    /// Persisting + Published for a completed generation.
    fn finish(
        &self,
        session: &Session,
        request: &TurnRequest,
        output: GenOutput,
        processing_ms: u64,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let tools_executed: Vec<ExecutedTool> = output
            .invocations
            .iter()
            .map(|i| ExecutedTool {
                name: i.name.clone(),
                status: i.outcome.status().to_string(),
            })
            .collect();
        let metadata = MessageMetadata {
            model_used: Some(output.validation.final_model.id.clone()),
            tools_invoked: tools_executed.iter().map(|t| t.name.clone()).collect(),
            processing_ms: Some(processing_ms),
            used_live_data: requires(&request.capability_requirements, Capability::LiveData),
            used_advanced_reasoning: requires(
                &request.capability_requirements,
                Capability::Reasoning,
            ),
            fell_back_from: output.validation.fell_back_from.clone(),
            error_code: None,
        };
        let assistant = self.store.append_message(&Message::assistant(
            &session.id,
            &output.text,
            &request.origin_surface,
            metadata,
        ))?;

        let mut invocations = output.invocations;
        for inv in &mut invocations {
            inv.message_id = Some(assistant.id.clone());
        }
        self.store.record_invocations(&assistant.id, &invocations)?;

        for inv in &invocations {
            let _ = self
                .emitter
                .publish(&session.id, SessionDelta::ToolExecution(inv.clone()));
        }
        let _ = self
            .emitter
            .publish(&session.id, SessionDelta::Message(assistant.clone()));
        self.set_typing(&session.id, false);
        info!(session_id = %session.id, seq = assistant.seq, "turn published");

        Ok(TurnOutcome {
            session_id: session.id.clone(),
            assistant_message: assistant,
            metadata: TurnMetadata {
                model_used: Some(output.validation.final_model.id),
                tools_executed,
                processing_ms,
                fell_back_from: output.validation.fell_back_from,
                error_code: None,
            },
        })
    }

    /// Failed: convert the error to an apology message and publish it. The
    /// user still gets exactly one assistant answer.
    fn fail(
        &self,
        session: &Session,
        request: &TurnRequest,
        err: &TurnError,
        processing_ms: u64,
    ) -> Result<TurnOutcome, OrchestratorError> {
        warn!(session_id = %session.id, code = err.code(), error = %err, "turn failed");
        let metadata = MessageMetadata {
            processing_ms: Some(processing_ms),
            error_code: Some(err.code().to_string()),
            ..MessageMetadata::default()
        };
        let assistant = self.store.append_message(&Message::assistant(
            &session.id,
            err.apology(),
            &request.origin_surface,
            metadata,
        ))?;
        let _ = self
            .emitter
            .publish(&session.id, SessionDelta::Message(assistant.clone()));
        self.set_typing(&session.id, false);

        Ok(TurnOutcome {
            session_id: session.id.clone(),
            assistant_message: assistant,
            metadata: TurnMetadata {
                processing_ms,
                error_code: Some(err.code().to_string()),
                ..TurnMetadata::default()
            },
        })
    }

    /// Cancelled turns persist a marker for the log but are not published
    /// as an assistant answer.
    fn persist_cancelled(
        &self,
        session: &Session,
        request: &TurnRequest,
        processing_ms: u64,
    ) -> Result<(), OrchestratorError> {
        let metadata = MessageMetadata {
            processing_ms: Some(processing_ms),
            error_code: Some(TurnError::Cancelled.code().to_string()),
            ..MessageMetadata::default()
        };
        let _ = self.store.append_message(&Message::assistant(
            &session.id,
            TurnError::Cancelled.apology(),
            &request.origin_surface,
            metadata,
        ))?;
        debug!(session_id = %session.id, "cancelled marker persisted");
        Ok(())
    }

    fn set_typing(&self, session_id: &str, active: bool) {
        let _ = self.emitter.publish(
            session_id,
            SessionDelta::Typing {
                surface: "assistant".into(),
                active,
            },
        );
    }
}

fn requires(caps: &BTreeSet<Capability>, cap: Capability) -> bool {
    caps.contains(&cap)
}

fn duration_ceil_ms(d: Duration) -> u64 {
    let micros = d.as_micros();
    if micros == 0 {
        return 0;
    }
    u64::try_from(micros.div_ceil(1000)).unwrap_or(u64::MAX)
}
