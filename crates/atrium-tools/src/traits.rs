//! The trait every tool implements, plus the per-invocation context.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Execution context passed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Session the invoking turn belongs to.
    pub session_id: String,
    /// Id of the invocation record being resolved.
    pub invocation_id: String,
    /// Cooperative cancellation for the owning turn.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// Context for a session with a fresh cancellation token.
    #[must_use]
    pub fn new(session_id: impl Into<String>, invocation_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            invocation_id: invocation_id.into(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Tool execution failure. Converted to a `failed` invocation record by the
/// dispatcher; tools never abort a turn.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The input payload did not match the tool's expectations.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The tool ran and failed.
    #[error("{0}")]
    ExecutionFailed(String),
    /// A dependency of the tool is down.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    /// The owning turn was cancelled mid-execution.
    #[error("cancelled")]
    Cancelled,
}

/// The core trait every tool implements.
///
/// Tools are looked up by [`name`](Tool::name) and invoked with a JSON
/// payload. New tools are registered, never special-cased anywhere else in
/// the system.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, the exact string the model requests.
    fn name(&self) -> &str;

    /// What the tool does, handed to the model alongside the name.
    fn description(&self) -> &str;

    /// Execute with a JSON input payload.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_construction() {
        let ctx = ToolContext::new("sess_1", "inv_1");
        assert_eq!(ctx.session_id, "sess_1");
        assert_eq!(ctx.invocation_id, "inv_1");
        assert!(!ctx.cancellation.is_cancelled());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ToolError::InvalidInput("missing `metro`".into()).to_string(),
            "invalid input: missing `metro`"
        );
        assert_eq!(ToolError::Cancelled.to_string(), "cancelled");
    }
}
