//! # atrium-runtime
//!
//! The turn orchestrator. Accepts user messages, resolves a model, runs the
//! bounded generate/tool-dispatch loop, persists the result, and publishes
//! deltas to the emitter.
//!
//! One contract above all others: for every accepted user message, exactly
//! one assistant message is persisted and published, whether the turn
//! succeeded or failed. Failures become apology messages with an internal
//! error code; they never escape as bare errors past [`orchestrator::Orchestrator::run_turn`].
//!
//! ## Crate Position
//!
//! Depends on: atrium-core, atrium-llm, atrium-resilience, atrium-store,
//! atrium-tools.
//! Depended on by: atrium-server, atrium-agent.

#![deny(unsafe_code)]

pub mod emitter;
pub mod orchestrator;
pub mod types;

pub use emitter::EventEmitter;
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use types::{ExecutedTool, TurnMetadata, TurnOutcome, TurnRequest};
