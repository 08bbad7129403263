//! Shared test utilities for metal-node integration tests.
//!
//! `TestServer` serves the Ironic node endpoints over HTTP and delegates
//! every request to an in-memory `FakeApi`, so the real reqwest client and
//! the reconcilers run against realistic state sequences.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use metal_node::clients::{ApiError, BareMetalApi, NodeRecord, ProvisionStateRequest};
use metal_node::metadata::Microversion;
use metal_node::test_util::FakeApi;
use metal_node::{ApiConfig, IronicClient, PowerState};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const MICROVERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";

#[derive(Clone)]
struct AppState {
    api: Arc<FakeApi>,
    versions: Arc<Mutex<Vec<String>>>,
}

impl AppState {
    fn record_version(&self, headers: &HeaderMap) {
        let version = headers
            .get(MICROVERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.versions.lock().unwrap().push(version);
    }
}

/// Test server wrapper around a fake Ironic API.
pub struct TestServer {
    pub addr: SocketAddr,
    pub api: Arc<FakeApi>,
    versions: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawn a server in front of `api`.
    pub async fn spawn(api: Arc<FakeApi>) -> Self {
        let versions = Arc::new(Mutex::new(Vec::new()));
        let state = AppState {
            api: api.clone(),
            versions: versions.clone(),
        };

        let router = Router::new()
            .route("/v1/", get(root))
            .route("/v1/nodes/{id}", get(get_node).delete(delete_node))
            .route("/v1/nodes/{id}/states/provision", put(set_provision_state))
            .route("/v1/nodes/{id}/states/power", put(set_power_state))
            .route("/v1/nodes/{id}/states/raid", put(set_raid_config))
            .with_state(state);

        // Use port 0 to let OS choose available port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            api,
            versions,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Endpoint as an operator would configure it.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client for this server with default settings.
    pub fn client(&self) -> IronicClient {
        IronicClient::new(&ApiConfig::new(self.endpoint())).expect("Failed to build client")
    }

    /// Client negotiating `microversion`.
    pub fn client_with(&self, microversion: Microversion) -> IronicClient {
        let mut config = ApiConfig::new(self.endpoint());
        config.microversion = microversion;
        IronicClient::new(&config).expect("Failed to build client")
    }

    /// Microversion headers received so far.
    pub fn versions(&self) -> Vec<String> {
        self.versions.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Ironic wraps faults as a JSON string inside `error_message`.
fn error_response(err: ApiError) -> Response {
    let (status, message) = match err {
        ApiError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            format!("Node {} could not be found.", id),
        ),
        ApiError::Rejected { status, message } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
            message,
        ),
        ApiError::Transport(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
    };
    let fault = json!({ "faultstring": message, "debuginfo": null }).to_string();
    (status, Json(json!({ "error_message": fault }))).into_response()
}

fn node_json(record: NodeRecord) -> Value {
    json!({
        "uuid": record.uuid,
        "name": record.name,
        "provision_state": record.provision_state,
        "target_provision_state": record.target_provision_state,
        "power_state": record.power_state,
        "target_power_state": record.target_power_state,
        "last_error": record.last_error,
        "properties": record.properties,
        "driver": "fake-hardware",
    })
}

async fn root(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    state.record_version(&headers);
    Json(json!({ "id": "v1", "status": "CURRENT" }))
}

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    state.record_version(&headers);
    let record = state.api.get_node(&id).await.map_err(error_response)?;
    Ok(Json(node_json(record)))
}

async fn set_provision_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ProvisionStateRequest>,
) -> Result<StatusCode, Response> {
    state
        .api
        .set_provision_state(&id, &request)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn set_power_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<StatusCode, Response> {
    let target = PowerState::from(body["target"].as_str().unwrap_or_default().to_string());
    let timeout = body
        .get("timeout")
        .and_then(Value::as_u64)
        .map(|t| t as u32);
    state
        .api
        .set_power_state(&id, &target, timeout)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn set_raid_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<StatusCode, Response> {
    state
        .api
        .set_raid_config(&id, &body["target_raid_config"])
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Response> {
    state.api.delete_node(&id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
