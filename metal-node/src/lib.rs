//! metal-node: reconciles bare-metal nodes against an Ironic-compatible
//! lifecycle API.
//!
//! A node is driven toward its declared provisioning target one legal hop
//! at a time:
//! - Fetch a fresh snapshot of the node
//! - Ask the state graph for the next step
//! - Issue at most one transition, then poll until it settles
//! - Repeat until converged, failed, timed out or cancelled
//!
//! Power state is reconciled by a separate loop once provisioning is done.

pub mod agent;
pub mod cleaning;
pub mod clients;
pub mod config;
pub mod error;
pub mod graph;
pub mod issuer;
pub mod iso9660;
pub mod metadata;
pub mod properties;
pub mod reconciler;
pub mod snapshot;
pub mod state;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use agent::{ApplyOutcome, DesiredSpec, NodeProvisioner};
pub use clients::{BareMetalApi, IronicClient};
pub use config::{ApiConfig, ReconcileSettings};
pub use error::{Error, ReconcileError, Result};
pub use issuer::ManualAction;
pub use reconciler::{PowerGoal, PowerReconciler, ProvisionGoal, ProvisionReconciler, Reconciler};
pub use state::{PowerState, ProvisionState, TargetProvisionState};
