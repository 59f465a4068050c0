//! Circuit-guarded tool dispatch with bounded fan-out.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use atrium_core::invocations::{ToolInvocation, ToolRequest};
use atrium_resilience::ResilienceRegistry;

use crate::registry::ToolRegistry;
use crate::traits::{Tool, ToolContext, ToolError};

/// Dispatcher tuning.
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Hard per-invocation deadline.
    pub tool_timeout: Duration,
    /// Concurrent invocations per round.
    pub max_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            max_concurrency: 5,
        }
    }
}

/// `Duration` to milliseconds, rounding up. `as_millis` truncates
/// sub-millisecond calls to a reported "0ms".
fn duration_ceil_ms(d: Duration) -> u64 {
    let micros = d.as_micros();
    if micros == 0 {
        return 0;
    }
    u64::try_from(micros.div_ceil(1000)).unwrap_or(u64::MAX)
}

/// Resolves model tool requests into invocation records.
///
/// Every dispatch produces exactly one finalized [`ToolInvocation`]; no
/// failure mode escapes as an error return.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    resilience: Arc<ResilienceRegistry>,
    config: DispatcherConfig,
    fan_out: Arc<Semaphore>,
}

impl ToolDispatcher {
    /// Dispatcher over a registry and resilience layer.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        resilience: Arc<ResilienceRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        let fan_out = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            registry,
            resilience,
            config,
            fan_out,
        }
    }

    /// Available `(name, description)` pairs for the model.
    #[must_use]
    pub fn catalog(&self) -> Vec<(String, String)> {
        self.registry.catalog()
    }

    /// Resolve one request into a finalized invocation record.
    ///
    /// Unknown tool, timeout, open circuit, tool failure, and cancellation
    /// all come back as a `failed` record.
    #[instrument(skip(self, request, cancel), fields(tool = %request.name, session_id))]
    pub async fn invoke(
        &self,
        request: ToolRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ToolInvocation {
        let record = ToolInvocation::pending(&request.name, request.input.clone());
        let start = Instant::now();

        let Some(tool) = self.registry.get(&request.name) else {
            warn!(tool = %request.name, "unknown tool requested");
            return self.finalize(
                record.fail(
                    format!("unknown tool `{}`", request.name),
                    duration_ceil_ms(start.elapsed()),
                ),
            );
        };

        let ctx = ToolContext {
            session_id: session_id.to_string(),
            invocation_id: record.id.clone(),
            cancellation: cancel.clone(),
        };
        let key = format!("tool:{}", request.name);
        let guarded = self
            .resilience
            .guard(&key, Self::run_tool(&*tool, request.input, &ctx, self.config.tool_timeout));

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                debug!(tool = %record.name, "invocation cancelled");
                Err("cancelled".to_string())
            }
            result = guarded => result.map_err(|e| e.to_string()),
        };

        let latency_ms = duration_ceil_ms(start.elapsed());
        let record = match outcome {
            Ok(output) => record.succeed(output, latency_ms),
            Err(error) => record.fail(error, latency_ms),
        };
        self.finalize(record)
    }

    /// The guarded section: timeout counts as a circuit failure, and so
    /// does any tool error.
    async fn run_tool(
        tool: &dyn Tool,
        input: Value,
        ctx: &ToolContext,
        deadline: Duration,
    ) -> Result<Value, ToolError> {
        match timeout(deadline, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::ExecutionFailed(format!(
                "timed out after {}s",
                deadline.as_secs()
            ))),
        }
    }

    fn finalize(&self, record: ToolInvocation) -> ToolInvocation {
        let status = record.outcome.status();
        counter!(
            "tool_invocations_total",
            "tool" => record.name.clone(),
            "status" => status,
        )
        .increment(1);
        histogram!("tool_invocation_duration_seconds", "tool" => record.name.clone())
            .record(record.latency_ms as f64 / 1000.0);
        record
    }

    /// Run one generation round's requests concurrently, bounded by the
    /// fan-out semaphore. The returned records preserve request order
    /// regardless of completion order.
    #[instrument(skip(self, requests, cancel), fields(session_id, count = requests.len()))]
    pub async fn invoke_round(
        &self,
        requests: Vec<ToolRequest>,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<ToolInvocation> {
        let invocations = requests.into_iter().map(|request| {
            let fan_out = Arc::clone(&self.fan_out);
            async move {
                // Semaphore is never closed; acquire cannot fail.
                let _permit = fan_out.acquire().await;
                self.invoke(request, session_id, cancel).await
            }
        });
        join_all(invocations).await
    }
}
