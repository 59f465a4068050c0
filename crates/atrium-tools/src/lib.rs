//! # atrium-tools
//!
//! Tool registry and the dispatcher that resolves model tool requests into
//! invocation records.
//!
//! Failures are data here: an unknown tool, a timeout, an open circuit, or
//! a tool error all come back as a `failed` [`atrium_core::invocations::ToolInvocation`]
//! record, never as an error return past the dispatcher. The model sees the
//! failure payload and adapts; the orchestrator persists the record as-is.
//!
//! ## Crate Position
//!
//! Depends on: atrium-core, atrium-resilience.
//! Depended on by: atrium-runtime, atrium-agent.

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod registry;
pub mod testutil;
pub mod traits;

pub use dispatcher::{DispatcherConfig, ToolDispatcher};
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolContext, ToolError};
