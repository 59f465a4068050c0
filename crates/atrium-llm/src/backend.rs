//! Abstract model backend interface.
//!
//! One capability: take a conversation, return either final text or a set
//! of tool-call requests (or both). Concrete providers implement
//! [`ModelBackend`]; nothing else in the system knows their identities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use atrium_core::invocations::ToolRequest;
use atrium_core::messages::Role;

/// One conversation entry handed to a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    /// Author role.
    pub role: Role,
    /// Text content. Tool results are fed back as `system` turns.
    pub content: String,
}

impl ChatTurn {
    /// Convenience constructor.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A named tool the model may request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Registered tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
}

/// Request for one generation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Model id to serve the step.
    pub model: String,
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatTurn>,
    /// Tools available this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

/// Result of one generation step: final text, tool-call requests, or both
/// (text alongside requests is kept and carried into the final answer).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTurn {
    /// Final (or partial) answer text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls the model wants resolved before it can finish.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolRequest>,
}

impl BackendTurn {
    /// A plain-text turn with no tool activity.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_requests: Vec::new(),
        }
    }

    /// A turn requesting tool calls.
    #[must_use]
    pub fn tools(requests: Vec<ToolRequest>) -> Self {
        Self {
            content: None,
            tool_requests: requests,
        }
    }

    /// Whether the model is done (no outstanding tool requests).
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.tool_requests.is_empty()
    }
}

/// Backend call failure.
#[derive(Clone, Debug, Error)]
pub enum BackendError {
    /// Provider returned a non-success status.
    #[error("provider returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },
    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Provider responded with something we cannot parse.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    /// Provider is known to be down or refusing work.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// The abstract provider capability.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Provider key; circuits are keyed `model:<provider>`.
    fn provider(&self) -> &str;

    /// Run one generation step.
    async fn generate(&self, request: &GenerateRequest) -> Result<BackendTurn, BackendError>;

    /// Cheap health check. Defaults to healthy for backends without one.
    async fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
