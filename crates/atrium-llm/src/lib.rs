//! # atrium-llm
//!
//! Model catalog and the abstract backend interface.
//!
//! Providers stay anonymous behind [`backend::ModelBackend`]: the rest of
//! the system only sees [`descriptor::ModelDescriptor`] catalog entries and
//! [`backend::BackendTurn`] results. [`registry::ModelRegistry`] owns
//! validation with deterministic fallback and health probing; probes run
//! through the resilience registry per provider so one dead provider cannot
//! block validation of the others.
//!
//! ## Crate Position
//!
//! Depends on: atrium-core, atrium-resilience.
//! Depended on by: atrium-runtime, atrium-server.

#![deny(unsafe_code)]

pub mod backend;
pub mod descriptor;
pub mod registry;
pub mod remote;
pub mod testutil;

pub use backend::{BackendError, BackendTurn, ChatTurn, GenerateRequest, ModelBackend};
pub use descriptor::{Capability, ModelDescriptor, ModelTier};
pub use registry::{ModelRegistry, RegistryError, Validation};
