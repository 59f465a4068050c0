//! Tool invocation vocabulary.
//!
//! A model turn may surface [`ToolRequest`]s; the dispatcher resolves each
//! into a [`ToolInvocation`] record. Records are append-only: created
//! `pending`, finalized exactly once as `succeeded` or `failed`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;

/// A tool call requested by a model generation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    /// Request id assigned by the backend (opaque to the core).
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Input payload.
    pub input: Value,
}

/// Outcome of one tool invocation.
///
/// Tagged union: each variant carries only the fields valid for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// Dispatched, not yet resolved.
    Pending,
    /// Tool completed and returned an output payload.
    Succeeded {
        /// Tool output.
        output: Value,
    },
    /// Tool failed, timed out, or was rejected by an open circuit.
    Failed {
        /// Error payload surfaced to the model and the record.
        error: String,
    },
}

impl InvocationOutcome {
    /// Stable status string (`pending` / `succeeded` / `failed`).
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            InvocationOutcome::Pending => "pending",
            InvocationOutcome::Succeeded { .. } => "succeeded",
            InvocationOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether this outcome is terminal.
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, InvocationOutcome::Pending)
    }
}

/// One external action taken during a turn.
///
/// Belongs to exactly one message once the turn persists; written at most
/// once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Invocation id (`inv_…`).
    pub id: String,
    /// Owning message, set when the turn persists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Tool name.
    pub name: String,
    /// Input payload as dispatched.
    pub input: Value,
    /// Resolution.
    #[serde(flatten)]
    pub outcome: InvocationOutcome,
    /// Wall-clock latency of the call.
    pub latency_ms: u64,
    /// RFC 3339 dispatch timestamp.
    pub started_at: String,
}

impl ToolInvocation {
    /// Create a pending record for a dispatched request.
    #[must_use]
    pub fn pending(name: impl Into<String>, input: Value) -> Self {
        Self {
            id: ids::new_invocation_id(),
            message_id: None,
            name: name.into(),
            input,
            outcome: InvocationOutcome::Pending,
            latency_ms: 0,
            started_at: ids::now_rfc3339(),
        }
    }

    /// Finalize as succeeded.
    #[must_use]
    pub fn succeed(mut self, output: Value, latency_ms: u64) -> Self {
        self.outcome = InvocationOutcome::Succeeded { output };
        self.latency_ms = latency_ms;
        self
    }

    /// Finalize as failed.
    #[must_use]
    pub fn fail(mut self, error: impl Into<String>, latency_ms: u64) -> Self {
        self.outcome = InvocationOutcome::Failed {
            error: error.into(),
        };
        self.latency_ms = latency_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_status_strings() {
        assert_eq!(InvocationOutcome::Pending.status(), "pending");
        assert!(!InvocationOutcome::Pending.is_final());
        let ok = InvocationOutcome::Succeeded {
            output: json!({"n": 1}),
        };
        assert_eq!(ok.status(), "succeeded");
        assert!(ok.is_final());
        let err = InvocationOutcome::Failed {
            error: "boom".into(),
        };
        assert_eq!(err.status(), "failed");
        assert!(err.is_final());
    }

    #[test]
    fn invocation_lifecycle() {
        let inv = ToolInvocation::pending("search", json!({"q": "duplex"}));
        assert!(inv.id.starts_with("inv_"));
        assert_eq!(inv.outcome, InvocationOutcome::Pending);

        let done = inv.succeed(json!({"hits": 3}), 12);
        assert_eq!(done.latency_ms, 12);
        assert_eq!(done.outcome.status(), "succeeded");
    }

    #[test]
    fn outcome_flattens_into_record_json() {
        let inv =
            ToolInvocation::pending("search", json!({})).fail("timed out", 30_000);
        let json = serde_json::to_value(&inv).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "timed out");
        assert_eq!(json["latencyMs"], 30_000);
        // message_id unset stays off the wire
        assert!(json.get("messageId").is_none());
    }

    #[test]
    fn succeeded_record_round_trips() {
        let inv = ToolInvocation::pending("valuation", json!({"parcel": "p9"}))
            .succeed(json!({"estimate": 420_000}), 88);
        let text = serde_json::to_string(&inv).unwrap();
        let back: ToolInvocation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, inv);
    }
}
