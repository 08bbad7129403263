//! User data over HTTPS with an operator-supplied CA certificate.
//!
//! A self-signed server certificate is only trusted when its PEM is handed
//! to the fetcher, base64 encoded the way operators pass it on the command
//! line.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use base64::Engine;
use metal_node::clients::{HttpUserDataFetcher, UserDataFetcher};
use metal_node::metadata::{build_provisioning_metadata, UserDataSource};
use metal_node::Error;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::Map;

const IGNITION: &str = "Full Ignition\n";

struct TlsServer {
    addr: SocketAddr,
    /// Base64 (URL-safe alphabet) of the server certificate PEM.
    ca_cert: String,
    handle: Handle,
}

impl TlsServer {
    async fn spawn() -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();

        let router = Router::new().route("/ignition", get(|| async { IGNITION }));
        let handle = Handle::new();
        let server = axum_server::bind_rustls(
            "127.0.0.1:0".parse().unwrap(),
            RustlsConfig::from_config(Arc::new(config)),
        )
        .handle(handle.clone())
        .serve(router.into_make_service());
        tokio::spawn(async move {
            server.await.expect("TLS server error");
        });
        let addr = handle.listening().await.expect("TLS server did not start");

        Self {
            addr,
            ca_cert: base64::engine::general_purpose::URL_SAFE.encode(cert.pem()),
            handle,
        }
    }

    fn url(&self) -> String {
        format!("https://localhost:{}/ignition", self.addr.port())
    }
}

impl Drop for TlsServer {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

fn fetcher() -> HttpUserDataFetcher {
    HttpUserDataFetcher::new(Duration::from_secs(5))
}

#[tokio::test]
async fn test_fetch_trusts_supplied_ca() {
    let server = TlsServer::spawn().await;

    let body = fetcher()
        .fetch(&server.url(), Some(&server.ca_cert))
        .await
        .unwrap();

    assert_eq!(body, IGNITION);
}

#[tokio::test]
async fn test_fetch_without_ca_rejects_self_signed() {
    let server = TlsServer::spawn().await;

    let result = fetcher().fetch(&server.url(), None).await;

    assert!(matches!(result, Err(Error::Transport(_))), "{:?}", result);
}

#[tokio::test]
async fn test_fetch_with_unrelated_ca_fails() {
    let server = TlsServer::spawn().await;
    let other = TlsServer::spawn().await;

    let result = fetcher().fetch(&server.url(), Some(&other.ca_cert)).await;

    assert!(matches!(result, Err(Error::Transport(_))), "{:?}", result);
}

#[tokio::test]
async fn test_fetch_with_malformed_ca_is_validation() {
    let server = TlsServer::spawn().await;

    let result = fetcher().fetch(&server.url(), Some("not base64!")).await;

    assert!(matches!(result, Err(Error::Validation(_))), "{:?}", result);
}

#[tokio::test]
async fn test_metadata_inlines_user_data_from_https() {
    let server = TlsServer::spawn().await;

    let metadata = build_provisioning_metadata(
        &fetcher(),
        Some(UserDataSource::Url {
            url: server.url(),
            ca_cert: Some(server.ca_cert.clone()),
        }),
        Map::new(),
        Map::new(),
    )
    .await
    .unwrap();
    assert_eq!(metadata.user_data(), Some(IGNITION));

    let metadata = build_provisioning_metadata(&fetcher(), None, Map::new(), Map::new())
        .await
        .unwrap();
    assert_eq!(metadata.user_data(), None);
}
