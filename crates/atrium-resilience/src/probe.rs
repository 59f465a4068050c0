//! Recovery probes.

use async_trait::async_trait;

/// An idempotent health probe for a guarded dependency.
///
/// Probes are invoked by the periodic recovery sweep while a circuit is
/// open; a successful probe force-closes the circuit before the cooldown
/// elapses. Probes must be side-effect free on the dependency.
#[async_trait]
pub trait RecoveryProbe: Send + Sync {
    /// Check whether the dependency is serving again.
    async fn probe(&self) -> Result<(), String>;
}

/// Probe backed by a closure, for simple wiring and tests.
pub struct FnProbe<F>(pub F);

#[async_trait]
impl<F, Fut> RecoveryProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), String>> + Send,
{
    async fn probe(&self) -> Result<(), String> {
        (self.0)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fn_probe_delegates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = Arc::clone(&calls);
        let probe = FnProbe(move || {
            let calls = Arc::clone(&calls_inner);
            async move {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(probe.probe().await.is_ok());
        assert!(probe.probe().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
