//! Error types for node reconciliation.

use std::time::Duration;

use thiserror::Error;

use crate::state::{PowerState, ProvisionState};

/// Errors produced by the reconciliation engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// The resource does not exist on the remote side.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or API failure. Not retried by the engine.
    #[error("transport: {0}")]
    Transport(String),

    /// Malformed request, e.g. missing metadata for `active`.
    #[error("validation: {0}")]
    Validation(String),

    /// No legal path from the current state to the target.
    #[error("unreachable state: {0}")]
    UnreachableState(String),

    /// Budget exhausted while the remote side was still busy.
    #[error("timed out after {elapsed:?} (budget {budget:?})")]
    TimedOut { elapsed: Duration, budget: Duration },

    /// The remote API refused the transition request itself.
    #[error("transition rejected: {0}")]
    TransitionRejected(String),

    /// The caller cancelled the reconciliation.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether re-running the whole reconciliation later may succeed
    /// without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::TimedOut { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A terminal reconciliation failure, with enough context to diagnose it
/// without querying the remote API again.
#[derive(Debug, Error)]
#[error(
    "node {resource_id} toward {target} ({}): {source}",
    describe_last_state(.last_state, .last_power_state)
)]
pub struct ReconcileError {
    pub resource_id: String,
    pub target: String,
    pub last_state: Option<ProvisionState>,
    pub last_power_state: Option<PowerState>,
    #[source]
    pub source: Error,
}

impl ReconcileError {
    pub fn new(
        resource_id: impl Into<String>,
        target: impl Into<String>,
        last_state: Option<ProvisionState>,
        source: Error,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            target: target.into(),
            last_state,
            last_power_state: None,
            source,
        }
    }

    pub fn with_power_state(mut self, power_state: Option<PowerState>) -> Self {
        self.last_power_state = power_state;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

fn describe_last_state(state: &Option<ProvisionState>, power: &Option<PowerState>) -> String {
    match (state, power) {
        (Some(state), Some(power)) => {
            format!("last observed state: {}, power: {}", state, power)
        }
        (Some(state), None) => format!("last observed state: {}", state),
        (None, _) => "state never observed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::TimedOut {
            elapsed: Duration::from_secs(2),
            budget: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!Error::Validation("missing".into()).is_retryable());
        assert!(!Error::UnreachableState("active -> manage".into()).is_retryable());
        assert!(!Error::TransitionRejected("409".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_reconcile_error_reports_last_state() {
        let err = ReconcileError::new(
            "node-0",
            "manage",
            Some(ProvisionState::Active),
            Error::UnreachableState("cannot manage an active node".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("node-0"));
        assert!(msg.contains("manage"));
        assert!(msg.contains("last observed state: active"));
        assert!(msg.contains("cannot manage an active node"));
    }

    #[test]
    fn test_reconcile_error_reports_power_state() {
        let err = ReconcileError::new(
            "node-0",
            "power on",
            Some(ProvisionState::Active),
            Error::TransitionRejected("still off".into()),
        )
        .with_power_state(Some(PowerState::PowerOff));
        assert!(err.to_string().contains("power: power off"));

        let err = ReconcileError::new("node-0", "manage", None, Error::Cancelled);
        assert!(err.to_string().contains("state never observed"));
    }
}
