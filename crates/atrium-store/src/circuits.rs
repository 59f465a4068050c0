//! Durable circuit snapshots.
//!
//! The binary persists resilience state on an interval and restores it at
//! boot, so a crash during a provider outage does not reset failure
//! accounting.

use rusqlite::params;
use tracing::instrument;

use atrium_resilience::CircuitSnapshot;

use crate::connection::ConnectionPool;
use crate::errors::Result;

/// Repository for the `circuit_states` table.
pub struct CircuitRepo {
    pool: ConnectionPool,
}

impl CircuitRepo {
    /// Repo over an already migrated pool.
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Write all snapshots in one transaction, replacing prior rows per key.
    #[instrument(skip(self, snapshots), fields(count = snapshots.len()))]
    pub fn upsert_all(&self, snapshots: &[CircuitSnapshot]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        for snapshot in snapshots {
            let _ = tx.execute(
                "INSERT INTO circuit_states
                   (key, open, consecutive_failures, last_failure_age_ms, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                   open = excluded.open,
                   consecutive_failures = excluded.consecutive_failures,
                   last_failure_age_ms = excluded.last_failure_age_ms,
                   updated_at = excluded.updated_at",
                params![
                    snapshot.key,
                    snapshot.open,
                    snapshot.consecutive_failures,
                    snapshot.last_failure_age_ms,
                    atrium_core::ids::now_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// All stored snapshots, sorted by key.
    pub fn load_all(&self) -> Result<Vec<CircuitSnapshot>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT key, open, consecutive_failures, last_failure_age_ms
             FROM circuit_states ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CircuitSnapshot {
                key: row.get(0)?,
                open: row.get(1)?,
                consecutive_failures: row.get(2)?,
                last_failure_age_ms: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, new_in_memory};
    use crate::migrations::run_migrations;

    fn repo() -> CircuitRepo {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let _ = run_migrations(&pool.get().unwrap()).unwrap();
        CircuitRepo::new(pool)
    }

    fn snapshot(key: &str, open: bool, failures: u32) -> CircuitSnapshot {
        CircuitSnapshot {
            key: key.into(),
            open,
            consecutive_failures: failures,
            last_failure_age_ms: open.then_some(1500),
        }
    }

    #[test]
    fn upsert_then_load_round_trips() {
        let repo = repo();
        repo.upsert_all(&[
            snapshot("model:alpha", true, 5),
            snapshot("tool:market_lookup", false, 2),
        ])
        .unwrap();

        let loaded = repo.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].key, "model:alpha");
        assert!(loaded[0].open);
        assert_eq!(loaded[1].consecutive_failures, 2);
    }

    #[test]
    fn upsert_replaces_existing_rows() {
        let repo = repo();
        repo.upsert_all(&[snapshot("model:alpha", true, 5)]).unwrap();
        repo.upsert_all(&[snapshot("model:alpha", false, 0)]).unwrap();

        let loaded = repo.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].open);
        assert_eq!(loaded[0].consecutive_failures, 0);
    }

    #[test]
    fn empty_upsert_is_a_no_op() {
        let repo = repo();
        repo.upsert_all(&[]).unwrap();
        assert!(repo.load_all().unwrap().is_empty());
    }
}
