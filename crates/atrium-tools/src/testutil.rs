//! Deterministic tools for dispatcher and orchestrator tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{Tool, ToolContext, ToolError};

/// Returns its input unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the input payload unchanged"
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(input)
    }
}

/// Always fails with a fixed message.
pub struct FailingTool {
    message: String,
}

impl FailingTool {
    /// Failing tool with the given error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed(self.message.clone()))
    }
}

/// Sleeps for a fixed duration before answering. Drives timeout paths under
/// paused tokio time.
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    /// Slow tool with the given delay.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps before answering"
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(input)
    }
}

/// Counts executions; optionally fails every call. Verifies that open
/// circuits reject without reaching the tool.
pub struct CountingTool {
    executions: AtomicU64,
    fail: bool,
}

impl CountingTool {
    /// Counting tool that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executions: AtomicU64::new(0),
            fail: false,
        }
    }

    /// Counting tool that fails every call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            executions: AtomicU64::new(0),
            fail: true,
        }
    }

    /// Number of times `execute` actually ran.
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }
}

impl Default for CountingTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "counting"
    }

    fn description(&self) -> &str {
        "Counts executions"
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let _ = self.executions.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            Err(ToolError::ExecutionFailed("scripted failure".into()))
        } else {
            Ok(input)
        }
    }
}
