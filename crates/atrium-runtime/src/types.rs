//! Turn request/outcome types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use atrium_core::messages::Message;
use atrium_llm::{Capability, ModelTier};

/// A user turn submitted for orchestration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Target session; `None` starts a new session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning user/installation, used when a session must be created.
    pub owner_id: String,
    /// User message text.
    pub message: String,
    /// Preferred model; validation may substitute a fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Capabilities this turn requires.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capability_requirements: BTreeSet<Capability>,
    /// Tier of the caller, gating premium models.
    #[serde(default)]
    pub caller_tier: ModelTier,
    /// Surface the turn originated from (`main`, `floating`, …).
    pub origin_surface: String,
}

/// One tool run during a turn, with its final status. A failed tool does
/// not fail the turn, so the status travels with the name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedTool {
    /// Tool name.
    pub name: String,
    /// Final invocation status (`succeeded` / `failed`).
    pub status: String,
}

/// Turn-level processing facts, echoed to the submitting surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    /// Model that served the turn, if resolution got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Tools executed, in dispatch order, each with its outcome status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_executed: Vec<ExecutedTool>,
    /// Wall-clock duration of the turn.
    pub processing_ms: u64,
    /// Requested model the turn fell back from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fell_back_from: Option<String>,
    /// Internal error code when the turn failed (`ERR_*`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Result of an accepted turn: the assistant answer (real or apology) plus
/// processing metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// Session the turn ran in (fresh id when none was supplied).
    pub session_id: String,
    /// The one assistant message produced by the turn.
    pub assistant_message: Message,
    /// Processing facts.
    pub metadata: TurnMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_with_defaults() {
        let json = serde_json::json!({
            "ownerId": "owner_1",
            "message": "how is my portfolio doing?",
            "originSurface": "main",
        });
        let req: TurnRequest = serde_json::from_value(json).unwrap();
        assert!(req.session_id.is_none());
        assert!(req.capability_requirements.is_empty());
        assert_eq!(req.caller_tier, ModelTier::Standard);
    }

    #[test]
    fn executed_tools_carry_their_status_on_the_wire() {
        let meta = TurnMetadata {
            tools_executed: vec![ExecutedTool {
                name: "search".into(),
                status: "failed".into(),
            }],
            processing_ms: 80,
            ..TurnMetadata::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["toolsExecuted"][0]["name"], "search");
        assert_eq!(json["toolsExecuted"][0]["status"], "failed");
    }

    #[test]
    fn metadata_serializes_sparse() {
        let meta = TurnMetadata {
            processing_ms: 1200,
            ..TurnMetadata::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["processingMs"], 1200);
        assert!(json.get("modelUsed").is_none());
        assert!(json.get("toolsExecuted").is_none());
        assert!(json.get("errorCode").is_none());
    }
}
