//! Provisioning reconciler - walks a node through the lifecycle graph one
//! hop at a time until it reaches the desired target.

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
use crate::graph::{next_step, Decision};
use crate::issuer::{ManualAction, TransitionIssuer};
use crate::metadata::{Microversion, ProvisioningMetadata};
use crate::snapshot::{ResourceSnapshot, SnapshotFetcher};
use crate::state::{ProvisionState, TargetProvisionState};

/// Desired provisioning state of a node.
#[derive(Debug, Clone)]
pub struct ProvisionGoal {
    pub target: TargetProvisionState,
    /// Required when the node still has to be deployed.
    pub metadata: Option<ProvisioningMetadata>,
}

impl ProvisionGoal {
    pub fn new(target: TargetProvisionState) -> Self {
        Self {
            target,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ProvisioningMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// State owned by a single reconcile call.
struct WorkflowRun<'a> {
    resource_id: &'a str,
    target: &'static str,
    poll_interval: Duration,
    max_wait: Duration,
    started: Instant,
    last_state: Option<ProvisionState>,
    /// Last request issued, and the state it was issued from.
    last_issued: Option<(Decision, ProvisionState)>,
}

impl<'a> WorkflowRun<'a> {
    /// `started` is when the caller's budget began; it may predate the run.
    fn new(
        resource_id: &'a str,
        target: &'static str,
        poll_interval: Duration,
        max_wait: Duration,
        started: Instant,
    ) -> Self {
        Self {
            resource_id,
            target,
            poll_interval,
            max_wait,
            started,
            last_state: None,
            last_issued: None,
        }
    }

    fn observe(&mut self, snapshot: &ResourceSnapshot) {
        self.last_state = Some(snapshot.provision_state.clone());
    }

    fn is_repeat(&self, decision: &Decision, state: &ProvisionState) -> bool {
        matches!(&self.last_issued, Some((d, s)) if d == decision && s == state)
    }

    fn fail(&self, source: Error) -> ReconcileError {
        ReconcileError::new(
            self.resource_id,
            self.target,
            self.last_state.clone(),
            source,
        )
    }

    /// Sleep one poll interval, then enforce the wall-clock budget.
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        if !pause(self.poll_interval, cancel).await {
            return Err(self.fail(Error::Cancelled));
        }

        let elapsed = self.started.elapsed();
        if elapsed > self.max_wait {
            warn!(
                node = %self.resource_id,
                target = self.target,
                elapsed = ?elapsed,
                "Gave up waiting for node"
            );
            return Err(self.fail(Error::TimedOut {
                elapsed,
                budget: self.max_wait,
            }));
        }
        Ok(())
    }
}

/// Provisioning reconciler backed by the lifecycle API.
pub struct ProvisionReconciler {
    fetcher: SnapshotFetcher,
    issuer: TransitionIssuer,
    poll_interval: Duration,
    max_wait: Duration,
}

impl ProvisionReconciler {
    pub fn new(
        api: Arc<dyn BareMetalApi>,
        microversion: Microversion,
        settings: &ReconcileSettings,
    ) -> Self {
        Self {
            fetcher: SnapshotFetcher::new(api.clone()),
            issuer: TransitionIssuer::new(api, microversion),
            poll_interval: settings.poll_interval,
            max_wait: settings.max_wait,
        }
    }

    /// Drive `id` toward `target`. Returns the state the node converged in
    /// (`absent` for `deleted`).
    pub async fn reconcile_provision_state(
        &self,
        id: &str,
        target: TargetProvisionState,
        metadata: Option<&ProvisioningMetadata>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionState, ReconcileError> {
        self.drive(id, target, metadata, cancel, Instant::now()).await
    }

    async fn drive(
        &self,
        id: &str,
        target: TargetProvisionState,
        metadata: Option<&ProvisioningMetadata>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ProvisionState, ReconcileError> {
        let mut run = WorkflowRun::new(
            id,
            target.as_str(),
            self.poll_interval,
            self.max_wait,
            started,
        );
        info!(node = %id, target = %target, "Reconciling provision state");

        loop {
            if cancel.is_cancelled() {
                return Err(run.fail(Error::Cancelled));
            }

            let snapshot = match self.fetcher.fetch(id).await {
                Ok(snapshot) => snapshot,
                Err(Error::NotFound(_)) if target == TargetProvisionState::Deleted => {
                    ResourceSnapshot::absent(id)
                }
                Err(e) => return Err(run.fail(e)),
            };
            run.observe(&snapshot);
            let current = snapshot.provision_state.clone();
            let decision = next_step(&current, target);

            match &decision {
                Decision::AlreadyConverged => {
                    info!(
                        node = %id,
                        state = %current,
                        elapsed = ?run.started.elapsed(),
                        "Provision state converged"
                    );
                    return Ok(current);
                }
                Decision::Wait => {
                    debug!(node = %id, state = %current, "Waiting for node");
                }
                Decision::Unreachable(reason) => {
                    return Err(run.fail(Error::UnreachableState(reason.clone())));
                }
                Decision::Transition(_) | Decision::DeleteResource => {
                    if snapshot.provision_in_flight() {
                        debug!(
                            node = %id,
                            state = %current,
                            in_flight = ?snapshot.target_provision_state,
                            "Transition in flight"
                        );
                    } else if run.is_repeat(&decision, &current) {
                        if let Some(last_error) = snapshot.last_error {
                            return Err(run.fail(Error::TransitionRejected(last_error)));
                        }
                        debug!(node = %id, state = %current, "Last request not picked up yet");
                    } else {
                        if cancel.is_cancelled() {
                            return Err(run.fail(Error::Cancelled));
                        }
                        if target == TargetProvisionState::Active && metadata.is_none() {
                            return Err(run.fail(Error::Validation(format!(
                                "provisioning metadata is required to deploy node {}",
                                id
                            ))));
                        }

                        let issued = match &decision {
                            Decision::Transition(to) => self.issuer.issue(id, *to, metadata).await,
                            _ => self.issuer.delete(id).await,
                        };
                        issued.map_err(|e| run.fail(e))?;
                        run.last_issued = Some((decision.clone(), current));
                    }
                }
            }

            run.wait(cancel).await?;
        }
    }

    /// Bring the node to `manageable`, run `action` and wait for the node
    /// to settle back in `manageable`. Both phases share one budget.
    pub async fn run_manual_action(
        &self,
        id: &str,
        action: &ManualAction,
        cancel: &CancellationToken,
    ) -> Result<ProvisionState, ReconcileError> {
        let started = Instant::now();
        self.drive(id, TargetProvisionState::Manage, None, cancel, started)
            .await?;

        let mut run = WorkflowRun::new(
            id,
            action.verb(),
            self.poll_interval,
            self.max_wait,
            started,
        );
        run.last_state = Some(ProvisionState::Manageable);
        if cancel.is_cancelled() {
            return Err(run.fail(Error::Cancelled));
        }
        self.issuer
            .issue_manual(id, action)
            .await
            .map_err(|e| run.fail(e))?;

        loop {
            run.wait(cancel).await?;

            let snapshot = self.fetcher.fetch(id).await.map_err(|e| run.fail(e))?;
            run.observe(&snapshot);
            let state = snapshot.provision_state.clone();

            if state == action.failure_state() {
                let reason = snapshot
                    .last_error
                    .unwrap_or_else(|| format!("{} failed", action.verb()));
                return Err(run.fail(Error::TransitionRejected(reason)));
            }
            if action.is_busy(&state) || snapshot.provision_in_flight() {
                debug!(node = %id, state = %state, action = action.verb(), "Manual action running");
                continue;
            }
            if state == ProvisionState::Manageable {
                info!(node = %id, action = action.verb(), "Manual action finished");
                return Ok(state);
            }
            return Err(run.fail(Error::UnreachableState(format!(
                "{} left node in '{}'",
                action.verb(),
                state
            ))));
        }
    }
}

#[async_trait]
impl Reconciler for ProvisionReconciler {
    type Spec = ProvisionGoal;
    type Status = ProvisionState;

    async fn reconcile(
        &self,
        id: &str,
        spec: &Self::Spec,
        cancel: &CancellationToken,
    ) -> Result<Self::Status, ReconcileError> {
        self.reconcile_provision_state(id, spec.target, spec.metadata.as_ref(), cancel)
            .await
    }
}
