//! Circuit breaker registry keyed by dependency.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::probe::RecoveryProbe;

/// Circuit breaker tuning.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before the next live attempt.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Error returned by [`ResilienceRegistry::guard`].
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The circuit for this key is open; the operation was not invoked.
    #[error("circuit open for dependency `{key}`")]
    CircuitOpen {
        /// Guarded dependency key.
        key: String,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> GuardError<E> {
    /// Whether this is a fail-fast rejection.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }
}

/// Per-key circuit state. All fields are atomics so unrelated keys never
/// contend and a single key needs no lock on the guard hot path.
///
/// Timestamps are milliseconds since the registry's anchor instant;
/// 0 in `opened_at_ms` means closed (offsets are bumped to at least 1 when
/// opening).
struct CircuitEntry {
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    last_failure_at_ms: AtomicU64,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            last_failure_at_ms: AtomicU64::new(0),
        }
    }
}

/// Point-in-time view of one circuit, for the health endpoint and the
/// durable snapshot written by the binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    /// Guarded dependency key (`model:<provider>` or `tool:<name>`).
    pub key: String,
    /// Whether the circuit is currently open.
    pub open: bool,
    /// Consecutive failure count.
    pub consecutive_failures: u32,
    /// Milliseconds since the last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_age_ms: Option<u64>,
}

/// Per-dependency circuit breaker and recovery-strategy store.
pub struct ResilienceRegistry {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Arc<CircuitEntry>>,
    probes: DashMap<String, Arc<dyn RecoveryProbe>>,
    total_errors: AtomicU64,
    /// Monotonic anchor for entry timestamps. Uses the tokio clock so
    /// cooldown behavior is testable under paused time.
    anchor: Instant,
}

impl ResilienceRegistry {
    /// Create a registry with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
            probes: DashMap::new(),
            total_errors: AtomicU64::new(0),
            anchor: Instant::now(),
        }
    }

    /// Create a registry with default thresholds (5 failures, 5 min cooldown).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    fn now_ms(&self) -> u64 {
        // Bump to 1 so a zero offset never collides with the closed marker.
        (self.anchor.elapsed().as_millis() as u64).max(1)
    }

    fn entry(&self, key: &str) -> Arc<CircuitEntry> {
        self.circuits
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitEntry::new()))
            .clone()
    }

    /// Execute `op` under the circuit for `key`.
    ///
    /// Open circuit inside the cooldown window → [`GuardError::CircuitOpen`]
    /// without polling `op`. The first call after the cooldown elapses is
    /// attempted live; its outcome decides whether the circuit closes or
    /// re-opens. No internal retry.
    pub async fn guard<T, E, F>(&self, key: &str, op: F) -> Result<T, GuardError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let entry = self.entry(key);

        let opened_at = entry.opened_at_ms.load(Ordering::Acquire);
        if opened_at != 0 {
            let elapsed = Duration::from_millis(self.now_ms().saturating_sub(opened_at));
            if elapsed < self.config.cooldown {
                counter!("circuit_rejections_total", "key" => key.to_string()).increment(1);
                debug!(key, remaining_ms = %(self.config.cooldown - elapsed).as_millis(),
                    "circuit open, call rejected");
                return Err(GuardError::CircuitOpen {
                    key: key.to_string(),
                });
            }
            // Cooldown elapsed — let this call through as the live probe.
            debug!(key, "cooldown elapsed, attempting live call");
        }

        match op.await {
            Ok(value) => {
                self.record_success(key, &entry);
                Ok(value)
            }
            Err(err) => {
                warn!(key, error = %err, "guarded call failed");
                self.record_failure(key, &entry);
                Err(GuardError::Inner(err))
            }
        }
    }

    fn record_success(&self, key: &str, entry: &CircuitEntry) {
        entry.consecutive_failures.store(0, Ordering::Release);
        if entry.opened_at_ms.swap(0, Ordering::AcqRel) != 0 {
            info!(key, "circuit closed after successful call");
            gauge!("circuit_open", "key" => key.to_string()).set(0.0);
        }
    }

    fn record_failure(&self, key: &str, entry: &CircuitEntry) {
        let _ = self.total_errors.fetch_add(1, Ordering::Relaxed);
        counter!("guard_failures_total", "key" => key.to_string()).increment(1);
        entry.last_failure_at_ms.store(self.now_ms(), Ordering::Release);

        let failures = entry.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.failure_threshold {
            let now = self.now_ms();
            // CAS so concurrent failures at the threshold open the circuit
            // once; a failed live probe re-opens by overwriting below.
            if entry
                .opened_at_ms
                .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                entry.opened_at_ms.store(now, Ordering::Release);
            }
            warn!(
                key,
                failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit opened"
            );
            gauge!("circuit_open", "key" => key.to_string()).set(1.0);
        }
    }

    /// Force a circuit closed (successful recovery probe, operator action).
    pub fn force_close(&self, key: &str) {
        if let Some(entry) = self.circuits.get(key) {
            entry.consecutive_failures.store(0, Ordering::Release);
            if entry.opened_at_ms.swap(0, Ordering::AcqRel) != 0 {
                info!(key, "circuit force-closed");
                gauge!("circuit_open", "key" => key.to_string()).set(0.0);
            }
        }
    }

    /// Register the idempotent recovery probe for `key`.
    pub fn register_probe(&self, key: impl Into<String>, probe: Arc<dyn RecoveryProbe>) {
        let _ = self.probes.insert(key.into(), probe);
    }

    /// Probe every open circuit that has a registered recovery strategy;
    /// a successful probe force-closes the circuit early. Returns the keys
    /// that were closed.
    pub async fn run_recovery_sweep(&self) -> Vec<String> {
        let open_keys: Vec<String> = self
            .circuits
            .iter()
            .filter(|e| e.value().opened_at_ms.load(Ordering::Acquire) != 0)
            .map(|e| e.key().clone())
            .collect();

        let mut recovered = Vec::new();
        for key in open_keys {
            let Some(probe) = self.probes.get(&key).map(|p| p.value().clone()) else {
                continue;
            };
            match probe.probe().await {
                Ok(()) => {
                    info!(key, "recovery probe succeeded");
                    self.force_close(&key);
                    recovered.push(key);
                }
                Err(err) => {
                    debug!(key, error = %err, "recovery probe failed");
                }
            }
        }
        recovered
    }

    /// Whether the circuit for `key` is currently open.
    #[must_use]
    pub fn is_open(&self, key: &str) -> bool {
        self.circuits
            .get(key)
            .is_some_and(|e| e.opened_at_ms.load(Ordering::Acquire) != 0)
    }

    /// Total guarded-call failures since startup (or restore).
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Number of currently open circuits.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.circuits
            .iter()
            .filter(|e| e.value().opened_at_ms.load(Ordering::Acquire) != 0)
            .count()
    }

    /// Snapshot every known circuit.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = self.now_ms();
        let mut out: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|e| {
                let entry = e.value();
                let last = entry.last_failure_at_ms.load(Ordering::Acquire);
                CircuitSnapshot {
                    key: e.key().clone(),
                    open: entry.opened_at_ms.load(Ordering::Acquire) != 0,
                    consecutive_failures: entry.consecutive_failures.load(Ordering::Acquire),
                    last_failure_age_ms: (last != 0).then(|| now.saturating_sub(last)),
                }
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Restore circuits from persisted snapshots.
    ///
    /// Monotonic timestamps do not survive a restart, so a restored open
    /// circuit is treated as freshly opened: the cooldown window restarts.
    pub fn restore(&self, snapshots: &[CircuitSnapshot]) {
        for snap in snapshots {
            let entry = self.entry(&snap.key);
            entry
                .consecutive_failures
                .store(snap.consecutive_failures, Ordering::Release);
            if snap.open {
                entry.opened_at_ms.store(self.now_ms(), Ordering::Release);
                gauge!("circuit_open", "key" => snap.key.clone()).set(1.0);
            }
        }
    }
}
