//! High-level transactional `SessionStore` API.
//!
//! Every write method runs inside a single `SQLite` transaction; callers
//! never observe partial state.
//!
//! INVARIANT: message appends are serialized per session via in-process
//! mutex locks (`with_session_write_lock`); `UNIQUE(session_id, seq)`
//! enforces the same ordering at the DB level.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, instrument};

use atrium_core::ids;
use atrium_core::invocations::{InvocationOutcome, ToolInvocation};
use atrium_core::messages::{Message, MessageMetadata, Role};

use crate::connection::{ConnectionPool, PooledConnection};
use crate::errors::{Result, StoreError};

/// One session row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Session id (`sess_…`).
    pub id: String,
    /// Owning user/installation.
    pub owner_id: String,
    /// Optional display title.
    pub title: Option<String>,
    /// Currently active model id, if one was pinned.
    pub active_model: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp of the last append or touch.
    pub last_activity_at: String,
}

/// Session store wrapping a connection pool.
pub struct SessionStore {
    pool: ConnectionPool,
    session_write_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl SessionStore {
    const SQLITE_BUSY_MAX_RETRIES: u32 = 32;

    /// Store over an already migrated pool.
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            session_write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn acquire_session_write_lock(&self, session_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .session_write_locks
            .lock()
            .map_err(|_| StoreError::Internal("session lock map poisoned".into()))?;

        // Opportunistically prune dead weak refs when the map grows.
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(session_id.to_string(), Arc::downgrade(&lock));
        Ok(lock)
    }

    fn with_session_write_lock<T>(
        &self,
        session_id: &str,
        f: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let session_lock = self.acquire_session_write_lock(session_id)?;
        let guard: MutexGuard<'_, ()> = session_lock
            .lock()
            .map_err(|_| StoreError::Internal("session write lock poisoned".into()))?;
        let result = Self::retry_on_sqlite_busy(f);
        drop(guard);
        result
    }

    /// Retry on `SQLite` BUSY/LOCKED with linear backoff + jitter.
    ///
    /// base = min(attempts * 10, 500) ms, jitter ±25%.
    fn retry_on_sqlite_busy<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err)
                    if Self::is_sqlite_busy_or_locked(&err)
                        && attempts < Self::SQLITE_BUSY_MAX_RETRIES =>
                {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_range = base_ms / 4;
                    let jitter = if jitter_range > 0 {
                        rand::random::<u64>() % (jitter_range * 2 + 1)
                    } else {
                        0
                    };
                    let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_sqlite_busy_or_locked(err: &StoreError) -> bool {
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Create a session, or return the existing row when the caller supplies
    /// an id that already exists. Idempotent by design: surfaces retry turn
    /// submissions with the same session id.
    #[instrument(skip(self), fields(owner_id))]
    pub fn create_session(
        &self,
        owner_id: &str,
        title: Option<&str>,
        explicit_id: Option<&str>,
    ) -> Result<Session> {
        let id = explicit_id.map_or_else(ids::new_session_id, str::to_string);
        self.with_session_write_lock(&id, || {
            let conn = self.conn()?;
            if let Some(existing) = Self::get_session_on(&conn, &id)? {
                debug!(session_id = %id, "create_session hit existing row");
                return Ok(existing);
            }
            let now = ids::now_rfc3339();
            let _ = conn.execute(
                "INSERT INTO sessions (id, owner_id, title, active_model, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
                params![id, owner_id, title, now],
            )?;
            Ok(Session {
                id: id.clone(),
                owner_id: owner_id.to_string(),
                title: title.map(String::from),
                active_model: None,
                created_at: now.clone(),
                last_activity_at: now,
            })
        })
    }

    /// Look up one session.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;
        Self::get_session_on(&conn, session_id)
    }

    fn get_session_on(conn: &rusqlite::Connection, session_id: &str) -> Result<Option<Session>> {
        let row = conn
            .query_row(
                "SELECT id, owner_id, title, active_model, created_at, last_activity_at
                 FROM sessions WHERE id = ?1",
                [session_id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        title: row.get(2)?,
                        active_model: row.get(3)?,
                        created_at: row.get(4)?,
                        last_activity_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Sessions for an owner, most recently active first.
    pub fn list_sessions(&self, owner_id: &str) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, active_model, created_at, last_activity_at
             FROM sessions WHERE owner_id = ?1 ORDER BY last_activity_at DESC",
        )?;
        let rows = stmt.query_map([owner_id], |row| {
            Ok(Session {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                title: row.get(2)?,
                active_model: row.get(3)?,
                created_at: row.get(4)?,
                last_activity_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Bump a session's last-activity timestamp.
    pub fn touch(&self, session_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
            params![ids::now_rfc3339(), session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Persist a model switch on the session row.
    pub fn set_active_model(&self, session_id: &str, model_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET active_model = ?1, last_activity_at = ?2 WHERE id = ?3",
            params![model_id, ids::now_rfc3339(), session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message log
    // ─────────────────────────────────────────────────────────────────────

    /// Append a message, assigning the next `seq` for its session inside
    /// one transaction. Returns the stored copy with `seq` set.
    #[instrument(skip(self, message), fields(session_id = %message.session_id, role = message.role.as_str()))]
    pub fn append_message(&self, message: &Message) -> Result<Message> {
        self.with_session_write_lock(&message.session_id, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;

            if Self::get_session_on(&tx, &message.session_id)?.is_none() {
                return Err(StoreError::SessionNotFound(message.session_id.clone()));
            }

            let seq: u64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?1",
                [&message.session_id],
                |row| row.get(0),
            )?;

            let metadata = serde_json::to_string(&message.metadata)?;
            let insert = tx.execute(
                "INSERT INTO messages
                   (id, session_id, seq, role, content, origin_surface, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id,
                    message.session_id,
                    seq,
                    message.role.as_str(),
                    message.content,
                    message.origin_surface,
                    metadata,
                    message.created_at,
                ],
            );
            if let Err(err) = insert {
                return Err(Self::map_append_error(err, &message.session_id, seq));
            }

            let _ = tx.execute(
                "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
                params![ids::now_rfc3339(), message.session_id],
            )?;
            tx.commit()?;

            let mut stored = message.clone();
            stored.seq = seq;
            Ok(stored)
        })
    }

    fn map_append_error(err: rusqlite::Error, session_id: &str, seq: u64) -> StoreError {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return StoreError::OrderingConflict {
                    session_id: session_id.to_string(),
                    seq,
                };
            }
        }
        StoreError::Sqlite(err)
    }

    /// Messages with `seq > since_seq`, ordered by `seq`. The catch-up path
    /// for reconnecting surfaces; `since_seq = 0` returns the full log.
    pub fn list_messages(&self, session_id: &str, since_seq: u64) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, seq, role, content, origin_surface, metadata, created_at
             FROM messages WHERE session_id = ?1 AND seq > ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![session_id, since_seq], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, session_id, seq, role, content, origin_surface, metadata, created_at) = row?;
            let role = Role::from_str(&role).map_err(StoreError::Internal)?;
            let metadata: MessageMetadata = serde_json::from_str(&metadata)?;
            messages.push(Message {
                id,
                session_id,
                seq,
                role,
                content,
                origin_surface,
                metadata,
                created_at,
            });
        }
        Ok(messages)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tool invocation records
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a turn's invocation records under their owning message, in
    /// one transaction.
    #[instrument(skip(self, invocations), fields(message_id, count = invocations.len()))]
    pub fn record_invocations(
        &self,
        message_id: &str,
        invocations: &[ToolInvocation],
    ) -> Result<()> {
        if invocations.is_empty() {
            return Ok(());
        }
        Self::retry_on_sqlite_busy(|| {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            for inv in invocations {
                let (status, output, error) = match &inv.outcome {
                    InvocationOutcome::Pending => ("pending", None, None),
                    InvocationOutcome::Succeeded { output } => {
                        ("succeeded", Some(serde_json::to_string(output)?), None)
                    }
                    InvocationOutcome::Failed { error } => {
                        ("failed", None, Some(error.clone()))
                    }
                };
                let _ = tx.execute(
                    "INSERT INTO tool_invocations
                       (id, message_id, name, input, output, status, error, latency_ms, started_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        inv.id,
                        message_id,
                        inv.name,
                        serde_json::to_string(&inv.input)?,
                        output,
                        status,
                        error,
                        inv.latency_ms,
                        inv.started_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Invocation records for a message, in insertion order.
    pub fn list_invocations(&self, message_id: &str) -> Result<Vec<ToolInvocation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, input, output, status, error, latency_ms, started_at
             FROM tool_invocations WHERE message_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([message_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, u64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut invocations = Vec::new();
        for row in rows {
            let (id, name, input, output, status, error, latency_ms, started_at) = row?;
            let input: Value = serde_json::from_str(&input)?;
            let outcome = match status.as_str() {
                "succeeded" => InvocationOutcome::Succeeded {
                    output: output
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()?
                        .unwrap_or(Value::Null),
                },
                "failed" => InvocationOutcome::Failed {
                    error: error.unwrap_or_default(),
                },
                "pending" => InvocationOutcome::Pending,
                other => {
                    return Err(StoreError::Internal(format!(
                        "corrupt invocation status `{other}`"
                    )));
                }
            };
            invocations.push(ToolInvocation {
                id,
                message_id: Some(message_id.to_string()),
                name,
                input,
                outcome,
                latency_ms,
                started_at,
            });
        }
        Ok(invocations)
    }
}
