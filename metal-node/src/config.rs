//! Configuration for the API client and the reconcilers.

use std::time::Duration;

use crate::metadata::Microversion;

/// Default microversion. Below 1.56 the config drive is sent as an image.
pub const DEFAULT_MICROVERSION: Microversion = Microversion::new(1, 52);

/// Connection settings for the lifecycle API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Endpoint, e.g. `http://localhost:6385/v1`.
    pub url: String,
    pub microversion: Microversion,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            microversion: DEFAULT_MICROVERSION,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Polling cadence and wall-clock budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub poll_interval: Duration,
    /// Budget for one provisioning reconciliation.
    pub max_wait: Duration,
    pub power_poll_interval: Duration,
    /// Budget for one power reconciliation.
    pub power_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(60 * 60),
            power_poll_interval: Duration::from_secs(1),
            power_timeout: Duration::from_secs(5 * 60),
        }
    }
}
