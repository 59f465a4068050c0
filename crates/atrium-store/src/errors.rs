//! Store error types.

use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON column serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// Requested session was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A message append collided on `(session_id, seq)`. The per-session
    /// write lock makes this unreachable in one process; hitting it means
    /// the ordering invariant broke.
    #[error("ordering conflict in session {session_id} at seq {seq}")]
    OrderingConflict {
        /// Session whose log collided.
        session_id: String,
        /// Colliding sequence number.
        seq: u64,
    },

    /// Internal error (poisoned lock, corrupt row).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
