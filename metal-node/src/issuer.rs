//! Transition issuer.
//!
//! Every request here is fire-and-forget: it returns once the remote has
//! accepted it, and completion is only observed through later snapshots.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cleaning::CleaningPlan;
use crate::clients::{ApiError, BareMetalApi, ProvisionStateRequest};
use crate::error::{Error, Result};
use crate::metadata::{Microversion, ProvisioningMetadata};
use crate::state::{PowerState, ProvisionState, TargetProvisionState};

/// One-shot operations on a `manageable` node.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualAction {
    Inspect,
    Clean(CleaningPlan),
}

impl ManualAction {
    pub fn verb(&self) -> &'static str {
        match self {
            ManualAction::Inspect => "inspect",
            ManualAction::Clean(_) => "clean",
        }
    }

    /// State the remote lands in when the action fails.
    pub fn failure_state(&self) -> ProvisionState {
        match self {
            ManualAction::Inspect => ProvisionState::InspectFailed,
            ManualAction::Clean(_) => ProvisionState::CleanFailed,
        }
    }

    /// States the remote passes through while the action runs.
    pub fn is_busy(&self, state: &ProvisionState) -> bool {
        match self {
            ManualAction::Inspect => matches!(
                state,
                ProvisionState::Inspecting | ProvisionState::InspectWait
            ),
            ManualAction::Clean(_) => {
                matches!(state, ProvisionState::Cleaning | ProvisionState::CleanWait)
            }
        }
    }
}

/// Issues provisioning, power, delete and manual-action requests.
#[derive(Clone)]
pub struct TransitionIssuer {
    api: Arc<dyn BareMetalApi>,
    microversion: Microversion,
}

impl TransitionIssuer {
    pub fn new(api: Arc<dyn BareMetalApi>, microversion: Microversion) -> Self {
        Self { api, microversion }
    }

    /// Request a single-hop provisioning transition. `metadata` is
    /// required when `target` is `active` and ignored otherwise.
    pub async fn issue(
        &self,
        id: &str,
        target: TargetProvisionState,
        metadata: Option<&ProvisioningMetadata>,
    ) -> Result<()> {
        let mut request = ProvisionStateRequest::new(target.as_str());

        if target == TargetProvisionState::Active {
            let metadata = metadata.ok_or_else(|| {
                Error::Validation(format!(
                    "provisioning metadata is required to deploy node {}",
                    id
                ))
            })?;
            request.configdrive = Some(metadata.config_drive(self.microversion)?);
        }

        info!(node = %id, target = %target, "Issuing provision transition");
        self.api.set_provision_state(id, &request).await?;
        Ok(())
    }

    /// Remove the node from the inventory. A node that is already gone
    /// counts as deleted.
    pub async fn delete(&self, id: &str) -> Result<()> {
        info!(node = %id, "Deleting node");
        match self.api.delete_node(id).await {
            Ok(()) => Ok(()),
            Err(ApiError::NotFound(_)) => {
                debug!(node = %id, "Node already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn issue_manual(&self, id: &str, action: &ManualAction) -> Result<()> {
        let mut request = ProvisionStateRequest::new(action.verb());

        if let ManualAction::Clean(plan) = action {
            if plan.steps.is_empty() {
                return Err(Error::Validation(format!(
                    "manual clean of node {} has no steps",
                    id
                )));
            }
            if let Some(raid) = &plan.target_raid_config {
                debug!(node = %id, "Setting target RAID configuration");
                self.api.set_raid_config(id, raid).await?;
            }
            request.clean_steps = Some(plan.steps.clone());
        }

        info!(node = %id, action = action.verb(), "Issuing manual action");
        self.api.set_provision_state(id, &request).await?;
        Ok(())
    }

    /// Request a power change. `timeout_hint` is passed to the remote as
    /// its own timeout in seconds.
    pub async fn issue_power(
        &self,
        id: &str,
        target: &PowerState,
        timeout_hint: Option<u32>,
    ) -> Result<()> {
        if !target.is_settable() {
            return Err(Error::Validation(format!(
                "'{}' is not a valid power target",
                target
            )));
        }

        info!(node = %id, target = %target, "Issuing power transition");
        self.api.set_power_state(id, target, timeout_hint).await?;
        Ok(())
    }
}
