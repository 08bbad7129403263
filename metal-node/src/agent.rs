//! Node provisioner - applies a full desired spec to one node: manual
//! actions first, then the provisioning target, then the power target.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clients::BareMetalApi;
use crate::config::ReconcileSettings;
use crate::error::ReconcileError;
use crate::issuer::ManualAction;
use crate::metadata::{Microversion, ProvisioningMetadata};
use crate::reconciler::{PowerGoal, PowerReconciler, ProvisionReconciler, Reconciler};
use crate::snapshot::SnapshotFetcher;
use crate::state::{PowerState, ProvisionState, TargetProvisionState};

/// Everything the operator declares for a node. Unset fields are left
/// alone.
#[derive(Debug, Clone, Default)]
pub struct DesiredSpec {
    pub target_provision_state: Option<TargetProvisionState>,
    pub target_power_state: Option<PowerState>,
    /// Seconds the remote may spend on a power change.
    pub power_timeout_hint: Option<u32>,
    pub metadata: Option<ProvisioningMetadata>,
    /// Run in order before the provisioning target is reconciled.
    pub manual_actions: Vec<ManualAction>,
}

/// Where the node ended up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub provision_state: Option<ProvisionState>,
    pub power_state: Option<PowerState>,
}

pub struct NodeProvisioner {
    fetcher: SnapshotFetcher,
    provision: ProvisionReconciler,
    power: PowerReconciler,
    power_timeout: Duration,
}

impl NodeProvisioner {
    pub fn new(
        api: Arc<dyn BareMetalApi>,
        microversion: Microversion,
        settings: &ReconcileSettings,
    ) -> Self {
        Self {
            fetcher: SnapshotFetcher::new(api.clone()),
            provision: ProvisionReconciler::new(api.clone(), microversion, settings),
            power: PowerReconciler::new(api, microversion, settings),
            power_timeout: settings.power_timeout,
        }
    }

    pub async fn apply(
        &self,
        id: &str,
        spec: &DesiredSpec,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, ReconcileError> {
        let mut outcome = ApplyOutcome::default();

        for action in &spec.manual_actions {
            info!(node = %id, action = action.verb(), "Running manual action");
            let state = self.provision.run_manual_action(id, action, cancel).await?;
            outcome.provision_state = Some(state);
        }

        if let Some(target) = spec.target_provision_state {
            let state = self
                .provision
                .reconcile_provision_state(id, target, spec.metadata.as_ref(), cancel)
                .await?;
            outcome.provision_state = Some(state);

            if target == TargetProvisionState::Deleted {
                return Ok(outcome);
            }
        }

        if let Some(target) = &spec.target_power_state {
            let state = self
                .apply_power(id, target, spec.power_timeout_hint, cancel)
                .await?;
            outcome.power_state = Some(state);
        }

        Ok(outcome)
    }

    async fn apply_power(
        &self,
        id: &str,
        target: &PowerState,
        timeout_hint: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<PowerState, ReconcileError> {
        // Reboots always act.
        if !target.is_reboot() {
            let snapshot = self
                .fetcher
                .fetch(id)
                .await
                .map_err(|e| ReconcileError::new(id, target.as_str(), None, e))?;

            if let Some(current) = &snapshot.power_state {
                if snapshot.target_power_state.is_none() && Some(current) == target.settled().as_ref()
                {
                    debug!(node = %id, power_state = %current, "Power state already matches");
                    return Ok(current.clone());
                }
            }
        }

        let goal = PowerGoal {
            target: target.clone(),
            timeout: self.power_timeout,
            timeout_hint,
        };
        self.power.reconcile(id, &goal, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_util::{Call, FakeApi, FakeNode};
    use serde_json::Map;

    fn provisioner(api: &Arc<FakeApi>) -> NodeProvisioner {
        let settings = ReconcileSettings {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(600),
            power_poll_interval: Duration::from_secs(1),
            power_timeout: Duration::from_secs(60),
        };
        NodeProvisioner::new(api.clone(), Microversion::CONFIG_DRIVE_OBJECT, &settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_and_power_on() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Enroll));
        let spec = DesiredSpec {
            target_provision_state: Some(TargetProvisionState::Active),
            target_power_state: Some(PowerState::PowerOn),
            metadata: Some(ProvisioningMetadata::new(None, Map::new(), Map::new())),
            ..DesiredSpec::default()
        };

        let outcome = provisioner(&api)
            .apply("node-0", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provision_state, Some(ProvisionState::Active));
        assert_eq!(outcome.power_state, Some(PowerState::PowerOn));
        assert_eq!(api.provision_targets(), vec!["manage", "provide", "active"]);
        assert!(matches!(api.calls().last(), Some(Call::Power { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_power_state_is_left_alone() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Active).power(PowerState::PowerOn));
        let spec = DesiredSpec {
            target_provision_state: Some(TargetProvisionState::Active),
            target_power_state: Some(PowerState::PowerOn),
            ..DesiredSpec::default()
        };

        let outcome = provisioner(&api)
            .apply("node-0", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.power_state, Some(PowerState::PowerOn));
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_always_acts() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Active).power(PowerState::PowerOn));
        let spec = DesiredSpec {
            target_power_state: Some(PowerState::Rebooting),
            ..DesiredSpec::default()
        };

        provisioner(&api)
            .apply("node-0", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_skips_power() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Available));
        let spec = DesiredSpec {
            target_provision_state: Some(TargetProvisionState::Deleted),
            target_power_state: Some(PowerState::PowerOn),
            ..DesiredSpec::default()
        };

        let outcome = provisioner(&api)
            .apply("node-0", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provision_state, Some(ProvisionState::Absent));
        assert_eq!(outcome.power_state, None);
        assert_eq!(api.calls(), vec![Call::Delete]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_then_provide() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Enroll));
        let spec = DesiredSpec {
            target_provision_state: Some(TargetProvisionState::Provide),
            manual_actions: vec![ManualAction::Inspect],
            ..DesiredSpec::default()
        };

        let outcome = provisioner(&api)
            .apply("node-0", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provision_state, Some(ProvisionState::Available));
        assert_eq!(api.provision_targets(), vec!["manage", "inspect", "provide"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_failure_stops_before_power() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Active));
        let spec = DesiredSpec {
            target_provision_state: Some(TargetProvisionState::Manage),
            target_power_state: Some(PowerState::PowerOn),
            ..DesiredSpec::default()
        };

        let err = provisioner(&api)
            .apply("node-0", &spec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.source, Error::UnreachableState(_)));
        assert!(api.calls().is_empty());
    }
}
