//! Conversation messages.
//!
//! A [`Message`] is one turn entry in a session's append-only log. Messages
//! are immutable once appended; the store assigns the per-session sequence
//! number at append time.

use serde::{Deserialize, Serialize};

use crate::ids;

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input.
    User,
    /// Model-produced answer (including apologies on failed turns).
    Assistant,
    /// Operational note injected by the core.
    System,
}

impl Role {
    /// Stable string form used in the database and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Processing metadata attached to a message.
///
/// Only assistant messages carry a populated bag; user and system messages
/// keep the default (all fields unset).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Model that served the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Names of tools invoked during the turn, in dispatch order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_invoked: Vec<String>,
    /// Wall-clock processing duration for the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
    /// Turn incorporated live-data context.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub used_live_data: bool,
    /// Turn used advanced reasoning.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub used_advanced_reasoning: bool,
    /// Model the turn fell back from, if validation downgraded it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fell_back_from: Option<String>,
    /// Internal error code on apology messages (`ERR_*`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// One entry in a session's message log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id (`msg_…`).
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Per-session sequence number, strictly increasing. Assigned by the
    /// store at append time; 0 means not yet appended.
    #[serde(default)]
    pub seq: u64,
    /// Author role.
    pub role: Role,
    /// Textual content.
    pub content: String,
    /// Surface that originated the message (e.g. `main`, `floating`).
    pub origin_surface: String,
    /// Processing metadata.
    #[serde(default)]
    pub metadata: MessageMetadata,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl Message {
    /// Build an unappended message with a fresh id and timestamp.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        origin_surface: impl Into<String>,
    ) -> Self {
        Self {
            id: ids::new_message_id(),
            session_id: session_id.into(),
            seq: 0,
            role,
            content: content.into(),
            origin_surface: origin_surface.into(),
            metadata: MessageMetadata::default(),
            created_at: ids::now_rfc3339(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(
        session_id: impl Into<String>,
        content: impl Into<String>,
        origin_surface: impl Into<String>,
    ) -> Self {
        Self::new(session_id, Role::User, content, origin_surface)
    }

    /// Build an assistant message with metadata.
    #[must_use]
    pub fn assistant(
        session_id: impl Into<String>,
        content: impl Into<String>,
        origin_surface: impl Into<String>,
        metadata: MessageMetadata,
    ) -> Self {
        let mut msg = Self::new(session_id, Role::Assistant, content, origin_surface);
        msg.metadata = metadata;
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [Role::User, Role::Assistant, Role::System] {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn new_message_has_fresh_identity() {
        let msg = Message::user("sess_1", "hello", "main");
        assert!(msg.id.starts_with("msg_"));
        assert_eq!(msg.seq, 0);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.origin_surface, "main");
        assert_eq!(msg.metadata, MessageMetadata::default());
    }

    #[test]
    fn metadata_serializes_camel_case_and_sparse() {
        let msg = Message::assistant(
            "sess_1",
            "done",
            "main",
            MessageMetadata {
                model_used: Some("m1".into()),
                processing_ms: Some(42),
                ..MessageMetadata::default()
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sessionId"], "sess_1");
        assert_eq!(json["originSurface"], "main");
        assert_eq!(json["metadata"]["modelUsed"], "m1");
        assert_eq!(json["metadata"]["processingMs"], 42);
        // Unset flags and empty lists stay off the wire.
        assert!(json["metadata"].get("usedLiveData").is_none());
        assert!(json["metadata"].get("toolsInvoked").is_none());
        assert!(json["metadata"].get("errorCode").is_none());
    }

    #[test]
    fn message_deserializes_without_seq() {
        let json = serde_json::json!({
            "id": "msg_1",
            "sessionId": "sess_1",
            "role": "assistant",
            "content": "hi",
            "originSurface": "floating",
            "createdAt": "2026-01-01T00:00:00Z",
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.seq, 0);
        assert_eq!(msg.role, Role::Assistant);
    }
}
