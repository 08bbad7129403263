//! Reconcilers for node state.
//!
//! Each reconciler compares desired state with what the remote reports and
//! polls until they agree. Runs against the same node must be serialized
//! by the caller: the engine does not lock, and concurrent transition
//! requests on one node race on the remote side.

pub mod power;
pub mod provision;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ReconcileError;

pub use power::{PowerGoal, PowerReconciler};
pub use provision::{ProvisionGoal, ProvisionReconciler};

/// Trait for node reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The desired state.
    type Spec: Send + Sync;
    /// What the node settled in.
    type Status;

    /// Drive the node toward `spec` until it converges, fails, times out
    /// or `cancel` fires.
    async fn reconcile(
        &self,
        id: &str,
        spec: &Self::Spec,
        cancel: &CancellationToken,
    ) -> Result<Self::Status, ReconcileError>;
}

/// Sleep between polls. Returns `false` if cancelled first.
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
