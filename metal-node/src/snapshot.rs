//! Point-in-time view of a node.

use std::sync::Arc;

use tracing::debug;

use crate::clients::{BareMetalApi, NodeRecord};
use crate::error::Result;
use crate::properties::NodeProperties;
use crate::state::{PowerState, ProvisionState};

/// Normalized, read-only view of a node.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub id: String,
    pub provision_state: ProvisionState,
    /// In-flight provisioning target reported by the remote.
    pub target_provision_state: Option<ProvisionState>,
    pub power_state: Option<PowerState>,
    /// In-flight power target; cleared by the remote once the change is done.
    pub target_power_state: Option<PowerState>,
    pub last_error: Option<String>,
    pub properties: NodeProperties,
}

impl ResourceSnapshot {
    pub fn from_record(record: NodeRecord) -> Self {
        Self {
            id: record.uuid,
            provision_state: record.provision_state,
            target_provision_state: record.target_provision_state,
            power_state: record.power_state,
            target_power_state: record.target_power_state,
            last_error: record.last_error,
            properties: record.properties,
        }
    }

    /// A node that is absent from the inventory.
    pub fn absent(id: &str) -> Self {
        Self {
            id: id.to_string(),
            provision_state: ProvisionState::Absent,
            target_provision_state: None,
            power_state: None,
            target_power_state: None,
            last_error: None,
            properties: NodeProperties::default(),
        }
    }

    /// The remote is still working on a provisioning request. A failure
    /// state keeps the target of the request that failed, but that request
    /// is over and the node accepts a new one.
    pub fn provision_in_flight(&self) -> bool {
        self.target_provision_state.is_some() && !self.provision_state.is_failure()
    }
}

/// Reads fresh snapshots. Never caches.
#[derive(Clone)]
pub struct SnapshotFetcher {
    api: Arc<dyn BareMetalApi>,
}

impl SnapshotFetcher {
    pub fn new(api: Arc<dyn BareMetalApi>) -> Self {
        Self { api }
    }

    /// Fails with `NotFound` if the node does not exist and `Transport`
    /// for any other failure.
    pub async fn fetch(&self, id: &str) -> Result<ResourceSnapshot> {
        let record = self.api.get_node(id).await?;
        let snapshot = ResourceSnapshot::from_record(record);
        debug!(
            node = %id,
            provision_state = %snapshot.provision_state,
            target_provision_state = ?snapshot.target_provision_state,
            power_state = ?snapshot.power_state,
            target_power_state = ?snapshot.target_power_state,
            "Fetched snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_util::{FakeApi, FakeNode};

    #[tokio::test]
    async fn test_fetch_normalizes_record() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Enroll).power(PowerState::PowerOff));
        let fetcher = SnapshotFetcher::new(api.clone());

        let snapshot = fetcher.fetch("node-0").await.unwrap();
        assert_eq!(snapshot.id, "node-0");
        assert_eq!(snapshot.provision_state, ProvisionState::Enroll);
        assert_eq!(snapshot.power_state, Some(PowerState::PowerOff));
        assert!(!snapshot.provision_in_flight());
    }

    #[tokio::test]
    async fn test_fetch_carries_properties() {
        let mut raw = serde_json::Map::new();
        raw.insert("cpus".into(), serde_json::json!(8));
        raw.insert("cpu_arch".into(), serde_json::json!("x86_64"));
        let api = Arc::new(FakeApi::new());
        api.insert(
            FakeNode::new("node-0", ProvisionState::Manageable).properties(NodeProperties::new(raw)),
        );

        let snapshot = SnapshotFetcher::new(api).fetch("node-0").await.unwrap();
        assert_eq!(snapshot.properties.cpus(), Some(8));
        assert_eq!(snapshot.properties.cpu_arch(), Some("x86_64"));
    }

    #[tokio::test]
    async fn test_failure_state_is_not_in_flight() {
        let api = Arc::new(FakeApi::new());
        api.insert(
            FakeNode::new("failed", ProvisionState::DeployFailed).in_flight(ProvisionState::Active),
        );
        api.insert(
            FakeNode::new("busy", ProvisionState::Deploying).in_flight(ProvisionState::Active),
        );
        let fetcher = SnapshotFetcher::new(api);

        let failed = fetcher.fetch("failed").await.unwrap();
        assert_eq!(failed.target_provision_state, Some(ProvisionState::Active));
        assert!(!failed.provision_in_flight());
        assert!(fetcher.fetch("busy").await.unwrap().provision_in_flight());
    }

    #[tokio::test]
    async fn test_fetch_never_caches() {
        let api = Arc::new(FakeApi::new());
        api.insert(FakeNode::new("node-0", ProvisionState::Enroll));
        let fetcher = SnapshotFetcher::new(api.clone());

        fetcher.fetch("node-0").await.unwrap();
        fetcher.fetch("node-0").await.unwrap();
        assert_eq!(api.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_missing_node() {
        let fetcher = SnapshotFetcher::new(Arc::new(FakeApi::new()));
        assert!(matches!(
            fetcher.fetch("ghost").await,
            Err(Error::NotFound(_))
        ));
    }
}
