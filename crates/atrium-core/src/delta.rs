//! Session deltas — incremental state changes published to surfaces.
//!
//! Every change to a session's visible state is expressed as a
//! [`SessionDelta`] and fanned out to all subscribed surfaces. Persistent
//! deltas (messages, tool executions, system notes) are backed by the store
//! and recoverable via catch-up; `typing` is transient and never replayed.

use serde::{Deserialize, Serialize};

use crate::ids;
use crate::invocations::ToolInvocation;
use crate::messages::Message;

/// Incremental state change for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionDelta {
    /// A message was appended to the session log.
    Message(Message),
    /// A tool invocation resolved during a turn.
    ToolExecution(ToolInvocation),
    /// Operational note (model switch, degraded mode, …).
    System {
        /// Human-readable note.
        note: String,
    },
    /// Transient typing indicator. Not persisted, not replayed.
    Typing {
        /// Surface the indicator belongs to (`assistant` for model activity).
        surface: String,
        /// Whether typing is in progress.
        active: bool,
    },
}

impl SessionDelta {
    /// Stable kind string, matching the wire `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionDelta::Message(_) => "message",
            SessionDelta::ToolExecution(_) => "tool_execution",
            SessionDelta::System { .. } => "system",
            SessionDelta::Typing { .. } => "typing",
        }
    }

    /// Transient deltas are pushed but never persisted or replayed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionDelta::Typing { .. })
    }
}

/// Wire envelope for a delta pushed over a surface connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFrame {
    /// Session the delta belongs to.
    pub session_id: String,
    /// RFC 3339 publish timestamp.
    pub timestamp: String,
    /// The delta itself (`type` + `data` on the wire).
    #[serde(flatten)]
    pub delta: SessionDelta,
}

impl DeltaFrame {
    /// Wrap a delta for publication.
    #[must_use]
    pub fn new(session_id: impl Into<String>, delta: SessionDelta) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: ids::now_rfc3339(),
            delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_wire_tag() {
        let deltas = [
            SessionDelta::Message(Message::user("s1", "hi", "main")),
            SessionDelta::ToolExecution(ToolInvocation::pending(
                "search",
                serde_json::json!({}),
            )),
            SessionDelta::System { note: "ok".into() },
            SessionDelta::Typing {
                surface: "assistant".into(),
                active: true,
            },
        ];
        for delta in deltas {
            let json = serde_json::to_value(&delta).unwrap();
            assert_eq!(json["type"], delta.kind());
        }
    }

    #[test]
    fn only_typing_is_transient() {
        assert!(
            SessionDelta::Typing {
                surface: "assistant".into(),
                active: false,
            }
            .is_transient()
        );
        assert!(!SessionDelta::System { note: "n".into() }.is_transient());
        assert!(
            !SessionDelta::Message(Message::user("s1", "hi", "main")).is_transient()
        );
    }

    #[test]
    fn frame_carries_session_and_tagged_payload() {
        let msg = Message::user("sess_9", "hello", "floating");
        let frame = DeltaFrame::new("sess_9", SessionDelta::Message(msg));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["sessionId"], "sess_9");
        assert_eq!(json["type"], "message");
        assert_eq!(json["data"]["content"], "hello");
        assert!(chrono::DateTime::parse_from_rfc3339(
            json["timestamp"].as_str().unwrap()
        )
        .is_ok());
    }

    #[test]
    fn frame_round_trips() {
        let frame = DeltaFrame::new(
            "sess_1",
            SessionDelta::Typing {
                surface: "assistant".into(),
                active: true,
            },
        );
        let text = serde_json::to_string(&frame).unwrap();
        let back: DeltaFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(back, frame);
    }
}
