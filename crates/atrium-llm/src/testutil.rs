//! Scriptable backends for tests in this crate and downstream crates.
//!
//! Not compiled into release paths; runtime and server test suites drive
//! the orchestrator against these instead of a live provider.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendError, BackendTurn, GenerateRequest, ModelBackend};

/// Backend that replays a scripted sequence of generation results.
///
/// Each `generate` call pops the next scripted result; when the script is
/// exhausted it keeps returning a fixed fallback text turn. Probes succeed
/// unless a probe error was installed.
pub struct ScriptedBackend {
    provider: String,
    script: Mutex<VecDeque<Result<BackendTurn, BackendError>>>,
    probe_error: Option<BackendError>,
    calls: AtomicU64,
}

impl ScriptedBackend {
    /// Backend with an empty script; every call returns the fallback text.
    #[must_use]
    pub fn healthy(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            script: Mutex::new(VecDeque::new()),
            probe_error: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Push one scripted result onto the replay queue.
    #[must_use]
    pub fn then(self, result: Result<BackendTurn, BackendError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Push a scripted text turn.
    #[must_use]
    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.then(Ok(BackendTurn::text(content)))
    }

    /// Make every probe fail with the given error.
    #[must_use]
    pub fn with_probe_error(mut self, error: BackendError) -> Self {
        self.probe_error = Some(error);
        self
    }

    /// Number of `generate` calls observed.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<BackendTurn, BackendError> {
        let _ = self.calls.fetch_add(1, Ordering::Relaxed);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(BackendTurn::text("ok")))
    }

    async fn probe(&self) -> Result<(), BackendError> {
        match &self.probe_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Backend whose `generate` never resolves. Exercises caller timeouts.
pub struct HangingBackend {
    provider: String,
}

impl HangingBackend {
    /// Hanging backend under the given provider key.
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

#[async_trait]
impl ModelBackend for HangingBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<BackendTurn, BackendError> {
        pending().await
    }
}
