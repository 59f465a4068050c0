//! Prefixed identifier generation.
//!
//! All atrium ids are uuid-v7 based: time-ordered, so lexicographic order on
//! ids of the same kind follows creation order. The prefix makes an id's kind
//! obvious in logs and wire payloads.

use uuid::Uuid;

fn prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

/// New session id (`sess_…`).
#[must_use]
pub fn new_session_id() -> String {
    prefixed("sess")
}

/// New message id (`msg_…`).
#[must_use]
pub fn new_message_id() -> String {
    prefixed("msg")
}

/// New tool invocation id (`inv_…`).
#[must_use]
pub fn new_invocation_id() -> String {
    prefixed("inv")
}

/// New surface connection id (`conn_…`).
#[must_use]
pub fn new_connection_id() -> String {
    prefixed("conn")
}

/// New turn id (`turn_…`), used for in-flight tracking only.
#[must_use]
pub fn new_turn_id() -> String {
    prefixed("turn")
}

/// Current UTC timestamp in RFC 3339.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
