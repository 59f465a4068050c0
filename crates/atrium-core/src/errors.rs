//! Turn error taxonomy.
//!
//! Failures inside a turn never escape the orchestrator boundary as panics
//! or bare errors; they are converted to a [`TurnError`], which maps to a
//! stable internal code and a user-facing apology. Exactly one visible
//! outcome is produced per accepted turn.

use std::time::Duration;

use thiserror::Error;

/// Why a turn could not complete normally.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Bad input to the orchestrator. Not retried, surfaced immediately.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A model or tool dependency is down or its circuit is open.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A model or tool call exceeded its budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Cooperative cancellation was requested by the caller.
    #[error("turn cancelled")]
    Cancelled,

    /// Internal invariant violation (e.g. store ordering conflict). Fatal
    /// to the single turn; the session remains usable.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl TurnError {
    /// Stable internal error code, recorded in apology-message metadata.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Validation(_) => "ERR_VALIDATION",
            TurnError::DependencyUnavailable(_) => "ERR_DEPENDENCY",
            TurnError::Timeout(_) => "ERR_TIMEOUT",
            TurnError::Cancelled => "ERR_CANCELLED",
            TurnError::Internal(_) => "ERR_INTERNAL",
        }
    }

    /// User-facing apology text for a failed turn. The user is never left
    /// without a visible response.
    #[must_use]
    pub fn apology(&self) -> String {
        match self {
            TurnError::Validation(reason) => {
                format!("I couldn't process that request: {reason}.")
            }
            TurnError::DependencyUnavailable(_) | TurnError::Timeout(_) => {
                "I ran into a problem reaching one of my data sources. \
                 Please try again in a moment."
                    .to_string()
            }
            TurnError::Cancelled => "This request was cancelled.".to_string(),
            TurnError::Internal(_) => {
                "Something went wrong on my end while preparing a response. \
                 Please try again."
                    .to_string()
            }
        }
    }

    /// Whether this failure counts toward circuit-breaker accounting.
    #[must_use]
    pub fn counts_toward_circuit(&self) -> bool {
        matches!(
            self,
            TurnError::DependencyUnavailable(_) | TurnError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn codes_are_stable() {
        assert_eq!(TurnError::Validation("x".into()).code(), "ERR_VALIDATION");
        assert_eq!(
            TurnError::DependencyUnavailable("m1".into()).code(),
            "ERR_DEPENDENCY"
        );
        assert_eq!(
            TurnError::Timeout(Duration::from_secs(60)).code(),
            "ERR_TIMEOUT"
        );
        assert_eq!(TurnError::Cancelled.code(), "ERR_CANCELLED");
        assert_eq!(TurnError::Internal("x".into()).code(), "ERR_INTERNAL");
    }

    #[test]
    fn every_variant_has_an_apology() {
        let errors = [
            TurnError::Validation("empty message".into()),
            TurnError::DependencyUnavailable("model:alpha".into()),
            TurnError::Timeout(Duration::from_secs(30)),
            TurnError::Cancelled,
            TurnError::Internal("ordering conflict".into()),
        ];
        for err in errors {
            assert!(!err.apology().is_empty());
        }
    }

    #[test]
    fn only_dependency_failures_count_toward_circuit() {
        assert!(TurnError::DependencyUnavailable("t".into()).counts_toward_circuit());
        assert!(TurnError::Timeout(Duration::from_secs(1)).counts_toward_circuit());
        assert!(!TurnError::Validation("x".into()).counts_toward_circuit());
        assert!(!TurnError::Cancelled.counts_toward_circuit());
        assert!(!TurnError::Internal("x".into()).counts_toward_circuit());
    }

    #[test]
    fn display_includes_detail() {
        let err = TurnError::Validation("message is empty".into());
        assert_matches!(err, TurnError::Validation(_));
        assert!(err.to_string().contains("message is empty"));
    }
}
