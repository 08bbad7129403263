//! metal-node: drives one bare-metal node to its declared state.
//!
//! This tool:
//! - Connects to the Ironic API and checks it is reachable
//! - Runs requested manual actions (inspect, clean)
//! - Reconciles the provisioning target, deploying with a config drive
//! - Reconciles the power target

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metal_node::cleaning::{build_manual_cleaning_steps, NO_RAID_INTERFACE};
use metal_node::clients::{BareMetalApi, HttpUserDataFetcher};
use metal_node::metadata::{build_provisioning_metadata, Microversion, UserDataSource};
use metal_node::snapshot::SnapshotFetcher;
use metal_node::{
    ApiConfig, DesiredSpec, IronicClient, ManualAction, NodeProvisioner, PowerState,
    ReconcileSettings, TargetProvisionState,
};

/// Bare-metal node reconciler
#[derive(Parser, Debug)]
#[command(name = "metal-node", version, about)]
struct Args {
    /// Node UUID or name
    node: String,

    /// Ironic API endpoint (e.g., http://localhost:6385/v1)
    #[arg(long, env = "IRONIC_ENDPOINT")]
    endpoint: String,

    /// API microversion to request
    #[arg(long, env = "IRONIC_MICROVERSION", default_value = "1.52")]
    microversion: Microversion,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Target provision state (manage, provide, active, deleted)
    #[arg(long)]
    target: Option<TargetProvisionState>,

    /// Target power state (e.g., "power on", "rebooting")
    #[arg(long)]
    power: Option<PowerState>,

    /// Timeout in seconds passed to Ironic with the power request
    #[arg(long)]
    power_timeout_hint: Option<u32>,

    /// Seconds between provisioning polls
    #[arg(long, default_value = "5")]
    poll_interval: u64,

    /// Maximum seconds to wait for the provisioning target
    #[arg(long, default_value = "3600")]
    max_wait: u64,

    /// Seconds between power polls
    #[arg(long, default_value = "1")]
    power_poll_interval: u64,

    /// Maximum seconds to wait for the power target
    #[arg(long, default_value = "300")]
    power_timeout: u64,

    /// Inline user data for the config drive
    #[arg(long, conflicts_with = "user_data_url")]
    user_data: Option<String>,

    /// URL to fetch user data from
    #[arg(long)]
    user_data_url: Option<String>,

    /// Base64-encoded PEM CA certificate for the user data URL
    #[arg(long, requires = "user_data_url")]
    user_data_ca_cert: Option<String>,

    /// JSON file with network data for the config drive
    #[arg(long)]
    network_data: Option<PathBuf>,

    /// JSON file with meta data for the config drive
    #[arg(long)]
    meta_data: Option<PathBuf>,

    /// Run hardware inspection before reconciling
    #[arg(long)]
    inspect: bool,

    /// RAID interface of the node's driver
    #[arg(long, default_value = NO_RAID_INTERFACE)]
    raid_interface: String,

    /// Target RAID configuration (JSON); triggers a manual clean
    #[arg(long)]
    raid_config: Option<String>,

    /// BIOS settings (JSON list of name/value); triggers a manual clean
    #[arg(long)]
    bios_settings: Option<String>,
}

impl Args {
    fn settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            poll_interval: Duration::from_secs(self.poll_interval),
            max_wait: Duration::from_secs(self.max_wait),
            power_poll_interval: Duration::from_secs(self.power_poll_interval),
            power_timeout: Duration::from_secs(self.power_timeout),
        }
    }

    fn user_data_source(&self) -> Option<UserDataSource> {
        if let Some(url) = &self.user_data_url {
            return Some(UserDataSource::Url {
                url: url.clone(),
                ca_cert: self.user_data_ca_cert.clone(),
            });
        }
        self.user_data.clone().map(UserDataSource::Inline)
    }
}

fn read_json_map(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} does not contain a JSON object", path.display()))
}

async fn desired_spec(args: &Args) -> Result<DesiredSpec> {
    let mut spec = DesiredSpec {
        target_provision_state: args.target,
        target_power_state: args.power.clone(),
        power_timeout_hint: args.power_timeout_hint,
        ..DesiredSpec::default()
    };

    if args.inspect {
        spec.manual_actions.push(ManualAction::Inspect);
    }
    let plan = build_manual_cleaning_steps(
        &args.raid_interface,
        args.raid_config.as_deref().unwrap_or_default(),
        args.bios_settings.as_deref().unwrap_or_default(),
    )
    .context("invalid cleaning settings")?;
    if let Some(plan) = plan {
        spec.manual_actions.push(ManualAction::Clean(plan));
    }

    if args.target == Some(TargetProvisionState::Active) {
        let fetcher = HttpUserDataFetcher::new(Duration::from_secs(args.request_timeout));
        let metadata = build_provisioning_metadata(
            &fetcher,
            args.user_data_source(),
            read_json_map(args.network_data.as_deref())?,
            read_json_map(args.meta_data.as_deref())?,
        )
        .await
        .context("failed to build provisioning metadata")?;
        spec.metadata = Some(metadata);
    }

    Ok(spec)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metal_node=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting metal-node for {}", args.node);
    info!("API endpoint: {}", args.endpoint);

    let mut api_config = ApiConfig::new(&args.endpoint);
    api_config.microversion = args.microversion;
    api_config.timeout = Duration::from_secs(args.request_timeout);

    let client = IronicClient::new(&api_config).context("invalid API configuration")?;
    client.check_connectivity().await?;
    info!(microversion = %client.microversion(), "Connected to Ironic API");

    let spec = desired_spec(&args).await?;
    let api: Arc<dyn BareMetalApi> = Arc::new(client);
    let provisioner = NodeProvisioner::new(api.clone(), args.microversion, &args.settings());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping after the current poll");
            trigger.cancel();
        }
    });

    let outcome = match provisioner.apply(&args.node, &spec, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            return Err(e.into());
        }
    };

    info!(
        node = %args.node,
        provision_state = ?outcome.provision_state,
        power_state = ?outcome.power_state,
        "Node reconciled"
    );

    if spec.target_provision_state != Some(TargetProvisionState::Deleted) {
        let snapshot = SnapshotFetcher::new(api).fetch(&args.node).await?;
        let properties = &snapshot.properties;
        info!(
            cpus = ?properties.cpus(),
            memory_mb = ?properties.memory_mb(),
            local_gb = ?properties.local_gb(),
            cpu_arch = ?properties.cpu_arch(),
            "Node properties"
        );
    }

    Ok(())
}
