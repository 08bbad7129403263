//! Provisioning state graph.
//!
//! The remote API only accepts the next single-hop transition. A node in
//! `enroll` that should become `active` is walked through `manage`,
//! `provide` and `active`, one hop per poll. `next_step` resolves that walk
//! recursively: a target that cannot act on the current state delegates to
//! its prerequisite target.

use crate::state::{ProvisionState, TargetProvisionState};

/// Deepest prerequisite chain: active -> provide -> manage.
const MAX_DEPTH: usize = 3;

/// What the reconciliation loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The node is in the destination state of the target.
    AlreadyConverged,
    /// The remote side is busy; poll again later.
    Wait,
    /// Issue this single-hop transition.
    Transition(TargetProvisionState),
    /// Remove the node from the inventory directly.
    DeleteResource,
    /// No legal path exists from the current state.
    Unreachable(String),
}

/// Decide the next step for `current` toward `target`.
pub fn next_step(current: &ProvisionState, target: TargetProvisionState) -> Decision {
    resolve(current, target, 0)
}

fn resolve(current: &ProvisionState, target: TargetProvisionState, depth: usize) -> Decision {
    if depth >= MAX_DEPTH {
        return Decision::Unreachable(format!(
            "prerequisite chain for '{}' from '{}' exceeds depth {}",
            target, current, MAX_DEPTH
        ));
    }

    let decision = match target {
        TargetProvisionState::Manage => to_manageable(current),
        TargetProvisionState::Provide => to_available(current, depth),
        TargetProvisionState::Active => to_active(current, depth),
        TargetProvisionState::Deleted => to_absent(current),
    };

    // A prerequisite resolving to "converged" means the parent target
    // failed to handle its own entry state.
    if depth > 0 && decision == Decision::AlreadyConverged {
        return Decision::Unreachable(format!(
            "state graph cycle: prerequisite '{}' already satisfied in '{}'",
            target, current
        ));
    }

    decision
}

fn to_manageable(current: &ProvisionState) -> Decision {
    match current {
        ProvisionState::Manageable => Decision::AlreadyConverged,
        ProvisionState::Enroll
        | ProvisionState::AdoptFailed
        | ProvisionState::CleanFailed
        | ProvisionState::InspectFailed
        | ProvisionState::Available => Decision::Transition(TargetProvisionState::Manage),
        ProvisionState::Verifying => Decision::Wait,
        other => Decision::Unreachable(format!(
            "cannot reach 'manageable' from '{}'",
            other
        )),
    }
}

fn to_available(current: &ProvisionState, depth: usize) -> Decision {
    match current {
        ProvisionState::Available => Decision::AlreadyConverged,
        ProvisionState::Cleaning | ProvisionState::CleanWait => Decision::Wait,
        ProvisionState::Manageable => Decision::Transition(TargetProvisionState::Provide),
        other => resolve(other, TargetProvisionState::Manage, depth + 1),
    }
}

fn to_active(current: &ProvisionState, depth: usize) -> Decision {
    match current {
        ProvisionState::Active => Decision::AlreadyConverged,
        ProvisionState::Deploying | ProvisionState::WaitCallBack => Decision::Wait,
        ProvisionState::Available => Decision::Transition(TargetProvisionState::Active),
        other => resolve(other, TargetProvisionState::Provide, depth + 1),
    }
}

fn to_absent(current: &ProvisionState) -> Decision {
    match current {
        ProvisionState::Absent => Decision::AlreadyConverged,
        ProvisionState::Available | ProvisionState::Enroll => Decision::DeleteResource,
        // Tear-down passes through deleting, deleted and cleaning before
        // the node lands in available.
        ProvisionState::Cleaning
        | ProvisionState::CleanWait
        | ProvisionState::Deleting
        | ProvisionState::Deleted => Decision::Wait,
        ProvisionState::Active
        | ProvisionState::WaitCallBack
        | ProvisionState::DeployFailed
        | ProvisionState::Error => Decision::Transition(TargetProvisionState::Deleted),
        other => Decision::Unreachable(format!(
            "cannot delete a node in '{}'; move it to 'available' or 'enroll' first",
            other
        )),
    }
}
