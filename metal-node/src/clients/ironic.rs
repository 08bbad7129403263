//! HTTP client for an Ironic-compatible bare-metal API.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ApiError, BareMetalApi, NodeRecord, ProvisionStateRequest};
use crate::config::ApiConfig;
use crate::error::Error;
use crate::metadata::Microversion;
use crate::state::PowerState;

const MICROVERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";

/// Client for interacting with the lifecycle API over HTTP.
#[derive(Clone)]
pub struct IronicClient {
    base_url: String,
    microversion: Microversion,
    http: reqwest::Client,
}

impl IronicClient {
    pub fn new(config: &ApiConfig) -> Result<Self, Error> {
        if config.url.trim().is_empty() {
            return Err(Error::Validation(
                "url is required for the bare-metal API".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: normalize_base_url(&config.url),
            microversion: config.microversion,
            http,
        })
    }

    pub fn microversion(&self) -> Microversion {
        self.microversion
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the API root so misconfiguration fails before any node is
    /// touched.
    pub async fn check_connectivity(&self) -> Result<(), Error> {
        let url = format!("{}/", self.base_url);
        debug!(url = %url, "Checking API connectivity");
        let response = self
            .http
            .get(&url)
            .header(MICROVERSION_HEADER, self.microversion.to_string())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("could not contact Ironic API: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "could not contact Ironic API: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn node_url(&self, id: &str) -> String {
        format!("{}/nodes/{}", self.base_url, id)
    }

    fn states_url(&self, id: &str, kind: &str) -> String {
        format!("{}/nodes/{}/states/{}", self.base_url, id, kind)
    }

    async fn send(&self, id: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .header(MICROVERSION_HEADER, self.microversion.to_string())
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("request for node {} failed: {}", id, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(id.to_string()));
        }
        if status.is_client_error() {
            warn!(node = %id, status = %status, message = %message, "Request rejected");
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Err(ApiError::Transport(format!("status {}: {}", status, message)))
    }
}

#[async_trait]
impl BareMetalApi for IronicClient {
    async fn get_node(&self, id: &str) -> Result<NodeRecord, ApiError> {
        let response = self.send(id, self.http.get(self.node_url(id))).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Transport(format!("failed to decode node {}: {}", id, e)))
    }

    async fn set_provision_state(
        &self,
        id: &str,
        request: &ProvisionStateRequest,
    ) -> Result<(), ApiError> {
        debug!(node = %id, target = %request.target, "PUT provision state");
        self.send(id, self.http.put(self.states_url(id, "provision")).json(request))
            .await?;
        Ok(())
    }

    async fn set_power_state(
        &self,
        id: &str,
        target: &PowerState,
        timeout: Option<u32>,
    ) -> Result<(), ApiError> {
        let mut body = json!({ "target": target.as_str() });
        if let Some(timeout) = timeout {
            body["timeout"] = json!(timeout);
        }
        debug!(node = %id, target = %target, "PUT power state");
        self.send(id, self.http.put(self.states_url(id, "power")).json(&body))
            .await?;
        Ok(())
    }

    async fn set_raid_config(&self, id: &str, raid_config: &Value) -> Result<(), ApiError> {
        let body = json!({ "target_raid_config": raid_config });
        self.send(id, self.http.put(self.states_url(id, "raid")).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> Result<(), ApiError> {
        debug!(node = %id, "DELETE node");
        self.send(id, self.http.delete(self.node_url(id))).await?;
        Ok(())
    }
}

/// Endpoint with the API version prefix and without a trailing slash.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

/// Pull the human-readable fault out of an error body. The remote wraps it
/// as a JSON string inside `error_message`.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let Some(inner) = value.get("error_message") else {
        return body.trim().to_string();
    };
    let inner = match inner {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or(Value::String(s.clone())),
        other => other.clone(),
    };
    if let Some(fault) = inner.get("faultstring").and_then(Value::as_str) {
        return fault.to_string();
    }
    match inner {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("http://localhost:6385/v1"),
            "http://localhost:6385/v1"
        );
        assert_eq!(
            normalize_base_url("http://localhost:6385/v1/"),
            "http://localhost:6385/v1"
        );
        assert_eq!(
            normalize_base_url("http://localhost:6385"),
            "http://localhost:6385/v1"
        );
    }

    #[test]
    fn test_error_message_unwraps_faultstring() {
        let body = r#"{"error_message": "{\"faultstring\": \"Node is locked by host conductor-1\", \"debuginfo\": null}"}"#;
        assert_eq!(error_message(body), "Node is locked by host conductor-1");

        let body = r#"{"error_message": {"faultstring": "bad target"}}"#;
        assert_eq!(error_message(body), "bad target");

        assert_eq!(error_message("Service Unavailable\n"), "Service Unavailable");
    }

    #[test]
    fn test_url_is_required() {
        let result = IronicClient::new(&ApiConfig::new(""));
        match result {
            Err(Error::Validation(msg)) => assert!(msg.contains("url is required")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }
}
