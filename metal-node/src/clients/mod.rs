//! Clients for the bare-metal lifecycle API.
//!
//! The engine talks to the remote side only through [`BareMetalApi`], an
//! injected capability object:
//! - ironic: HTTP implementation against an Ironic-compatible endpoint
//! - user_data: resolves user data references into inline content

pub mod ironic;
pub mod user_data;

pub use ironic::IronicClient;
pub use user_data::{HttpUserDataFetcher, UserDataFetcher};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cleaning::CleanStep;
use crate::error::Error;
use crate::metadata::ConfigDrive;
use crate::properties::NodeProperties;
use crate::state::{PowerState, ProvisionState};

/// Errors reported by an API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote returned 404 for the node.
    #[error("node {0} not found")]
    NotFound(String),

    /// The remote refused the request (4xx other than 404).
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Connection, timeout, decoding or server-side failure.
    #[error("{0}")]
    Transport(String),
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(id) => Error::NotFound(id),
            ApiError::Rejected { status, message } => {
                Error::TransitionRejected(format!("status {}: {}", status, message))
            }
            ApiError::Transport(msg) => Error::Transport(msg),
        }
    }
}

/// Node as returned by `GET /v1/nodes/{id}`. Only the fields the engine
/// consumes are decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub provision_state: ProvisionState,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub target_provision_state: Option<ProvisionState>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub power_state: Option<PowerState>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub target_power_state: Option<PowerState>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub last_error: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: NodeProperties,
}

// The remote reports "no value" as either null or "".
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(T::from))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of `PUT /v1/nodes/{id}/states/provision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionStateRequest {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configdrive: Option<ConfigDrive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_steps: Option<Vec<CleanStep>>,
}

impl ProvisionStateRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            configdrive: None,
            clean_steps: None,
        }
    }
}

/// The remote lifecycle API consumed by the engine.
///
/// Implementations must not cache: every `get_node` is a fresh read.
#[async_trait]
pub trait BareMetalApi: Send + Sync {
    async fn get_node(&self, id: &str) -> Result<NodeRecord, ApiError>;

    async fn set_provision_state(
        &self,
        id: &str,
        request: &ProvisionStateRequest,
    ) -> Result<(), ApiError>;

    /// `timeout` is forwarded to the remote as its own power-change timeout
    /// in seconds.
    async fn set_power_state(
        &self,
        id: &str,
        target: &PowerState,
        timeout: Option<u32>,
    ) -> Result<(), ApiError>;

    async fn set_raid_config(&self, id: &str, raid_config: &Value) -> Result<(), ApiError>;

    async fn delete_node(&self, id: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_record_decodes_nulls() {
        let record: NodeRecord = serde_json::from_value(json!({
            "uuid": "1be26c0b-03f2-4d2e-ae87-c02d7f33c123",
            "name": "node-0",
            "provision_state": "clean wait",
            "target_provision_state": null,
            "power_state": "power off",
            "target_power_state": "",
            "last_error": null,
            "properties": {"cpu_arch": "x86_64"},
            "driver": "ipmi"
        }))
        .unwrap();

        assert_eq!(record.provision_state, ProvisionState::CleanWait);
        assert_eq!(record.target_provision_state, None);
        assert_eq!(record.power_state, Some(PowerState::PowerOff));
        assert_eq!(record.target_power_state, None);
        assert_eq!(record.properties.cpu_arch(), Some("x86_64"));
    }

    #[test]
    fn test_provision_request_omits_empty_fields() {
        let body = serde_json::to_value(ProvisionStateRequest::new("provide")).unwrap();
        assert_eq!(body, json!({"target": "provide"}));
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(
            Error::from(ApiError::NotFound("n".into())),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from(ApiError::Rejected {
                status: 409,
                message: "locked".into()
            }),
            Error::TransitionRejected(_)
        ));
        assert!(matches!(
            Error::from(ApiError::Transport("reset".into())),
            Error::Transport(_)
        ));
    }
}
