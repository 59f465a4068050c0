//! # atrium-resilience
//!
//! Per-dependency circuit breakers for the Atrium core.
//!
//! Every outbound dependency (a model provider, a tool) is guarded under a
//! string key. [`ResilienceRegistry::guard`] executes an operation unless the
//! key's circuit is open, in which case it fails fast with
//! [`GuardError::CircuitOpen`] without invoking the operation. Consecutive
//! failures open the circuit; a cooldown window closes it again, and a
//! registered [`RecoveryProbe`] can force-close it early via the periodic
//! recovery sweep.
//!
//! The registry never retries internally — backoff and retry policy belong
//! to the callers, so each dependency type keeps its own strategy.
//!
//! ## Crate Position
//!
//! Leaf crate. Depended on by atrium-llm, atrium-tools, atrium-runtime, and
//! atrium-server (health endpoint).

#![deny(unsafe_code)]

pub mod probe;
pub mod registry;

pub use probe::RecoveryProbe;
pub use registry::{CircuitBreakerConfig, CircuitSnapshot, GuardError, ResilienceRegistry};
