//! Power reconciler.
//!
//! A power change is complete once the remote clears `target_power_state`.
//! Reboots are transient targets and settle in `power on`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{pause, Reconciler};
use crate::clients::BareMetalApi;
use crate::config::ReconcileSettings;
use crate::error::{Error, ReconcileError};
use crate::issuer::TransitionIssuer;
use crate::metadata::Microversion;
use crate::snapshot::{ResourceSnapshot, SnapshotFetcher};
use crate::state::PowerState;

/// Desired power state of a node.
#[derive(Debug, Clone)]
pub struct PowerGoal {
    pub target: PowerState,
    /// Wall-clock budget for the change to complete.
    pub timeout: Duration,
    /// Timeout in seconds forwarded to the remote with the request.
    pub timeout_hint: Option<u32>,
}

impl PowerGoal {
    pub fn new(target: PowerState, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            timeout_hint: None,
        }
    }
}

pub struct PowerReconciler {
    fetcher: SnapshotFetcher,
    issuer: TransitionIssuer,
    poll_interval: Duration,
}

impl PowerReconciler {
    pub fn new(
        api: Arc<dyn BareMetalApi>,
        microversion: Microversion,
        settings: &ReconcileSettings,
    ) -> Self {
        Self {
            fetcher: SnapshotFetcher::new(api.clone()),
            issuer: TransitionIssuer::new(api, microversion),
            poll_interval: settings.power_poll_interval,
        }
    }

    pub async fn reconcile_power_state(
        &self,
        id: &str,
        goal: &PowerGoal,
        cancel: &CancellationToken,
    ) -> Result<PowerState, ReconcileError> {
        let fail = |last: Option<&ResourceSnapshot>, source: Error| {
            ReconcileError::new(
                id,
                goal.target.as_str(),
                last.map(|s| s.provision_state.clone()),
                source,
            )
            .with_power_state(last.and_then(|s| s.power_state.clone()))
        };

        let Some(expected) = goal.target.settled() else {
            return Err(fail(
                None,
                Error::Validation(format!("'{}' is not a valid power target", goal.target)),
            ));
        };
        if cancel.is_cancelled() {
            return Err(fail(None, Error::Cancelled));
        }

        let started = Instant::now();
        self.issuer
            .issue_power(id, &goal.target, goal.timeout_hint)
            .await
            .map_err(|e| fail(None, e))?;

        let mut last: Option<ResourceSnapshot> = None;
        loop {
            if !pause(self.poll_interval, cancel).await {
                return Err(fail(last.as_ref(), Error::Cancelled));
            }

            let snapshot = self
                .fetcher
                .fetch(id)
                .await
                .map_err(|e| fail(last.as_ref(), e))?;

            if snapshot.target_power_state.is_none() {
                if snapshot.power_state.as_ref() == Some(&expected) {
                    info!(
                        node = %id,
                        power_state = %expected,
                        elapsed = ?started.elapsed(),
                        "Power state converged"
                    );
                    return Ok(expected);
                }

                let reported = snapshot
                    .power_state
                    .as_ref()
                    .map(PowerState::as_str)
                    .unwrap_or("unknown");
                let reason = match &snapshot.last_error {
                    Some(last_error) => last_error.clone(),
                    None => format!(
                        "node reports '{}' after '{}' completed",
                        reported, goal.target
                    ),
                };
                warn!(node = %id, target = %goal.target, reported, "Power change did not land");
                return Err(fail(Some(&snapshot), Error::TransitionRejected(reason)));
            }

            debug!(
                node = %id,
                power_state = ?snapshot.power_state,
                target = ?snapshot.target_power_state,
                "Power change in flight"
            );
            last = Some(snapshot);

            let elapsed = started.elapsed();
            if elapsed >= goal.timeout {
                return Err(fail(
                    last.as_ref(),
                    Error::TimedOut {
                        elapsed,
                        budget: goal.timeout,
                    },
                ));
            }
        }
    }
}

#[async_trait]
impl Reconciler for PowerReconciler {
    type Spec = PowerGoal;
    type Status = PowerState;

    async fn reconcile(
        &self,
        id: &str,
        spec: &Self::Spec,
        cancel: &CancellationToken,
    ) -> Result<Self::Status, ReconcileError> {
        self.reconcile_power_state(id, spec, cancel).await
    }
}
