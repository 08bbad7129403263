//! User data fetcher.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tracing::debug;

use crate::error::{Error, Result};

/// Resolves a user data URL into its content.
#[async_trait]
pub trait UserDataFetcher: Send + Sync {
    /// `ca_cert` is a base64-encoded PEM certificate to trust for this
    /// request.
    async fn fetch(&self, url: &str, ca_cert: Option<&str>) -> Result<String>;
}

/// Fetches user data over HTTP(S).
pub struct HttpUserDataFetcher {
    timeout: Duration,
}

impl HttpUserDataFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, ca_cert: Option<&str>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(encoded) = ca_cert.filter(|c| !c.is_empty()) {
            let pem = decode_ca_cert(encoded)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Validation(format!("invalid user data CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        builder
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))
    }
}

impl Default for HttpUserDataFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl UserDataFetcher for HttpUserDataFetcher {
    async fn fetch(&self, url: &str, ca_cert: Option<&str>) -> Result<String> {
        let client = self.client(ca_cert)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("failed to fetch user data from {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "user data request to {} failed: {}",
                url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read user data body: {}", e)))?;
        debug!(url = %url, bytes = body.len(), "Fetched user data");
        Ok(body)
    }
}

/// Decode a base64 CA certificate. URL-safe and standard alphabets are
/// both accepted.
pub fn decode_ca_cert(encoded: &str) -> Result<Vec<u8>> {
    let encoded = encoded.trim();
    base64::engine::general_purpose::URL_SAFE
        .decode(encoded)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(encoded))
        .map_err(|e| Error::Validation(format!("CA certificate is not valid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_decode_ca_cert_alphabets() {
        let url_safe = base64::engine::general_purpose::URL_SAFE.encode(PEM);
        let standard = base64::engine::general_purpose::STANDARD.encode(PEM);

        assert_eq!(decode_ca_cert(&url_safe).unwrap(), PEM.as_bytes());
        assert_eq!(decode_ca_cert(&standard).unwrap(), PEM.as_bytes());
        assert!(matches!(
            decode_ca_cert("not base64!"),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_is_transport_error() {
        let fetcher = HttpUserDataFetcher::new(Duration::from_millis(500));
        let result = fetcher.fetch("http://127.0.0.1:1/ignition", None).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
