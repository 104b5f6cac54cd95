mod bootstrap;
mod debug;
mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use xds_core::metrics::ClientMetrics;
use xds_core::{AdsClient, ClientConfig, GrpcConnector};

use bootstrap::Bootstrap;
use handler::{ClientState, LoggingHandler};

#[derive(Parser)]
#[command(
    name = "xds-client",
    about = "Aggregated discovery client that follows cluster and endpoint updates"
)]
struct Cli {
    /// Bootstrap file naming the management server and node identity.
    #[arg(long, env = "GRPC_XDS_BOOTSTRAP")]
    bootstrap: Option<PathBuf>,

    /// Management server URI; overrides the bootstrap file.
    #[arg(long)]
    server_uri: Option<String>,

    /// Dial target the balancer resolves, advertised in node metadata.
    #[arg(long, default_value = "localhost")]
    target: String,

    /// Request cluster resources before endpoints.
    #[arg(long)]
    cluster_discovery: bool,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// HTTP port for metrics, health probes, and debug endpoints.
    #[arg(long, default_value_t = 10094)]
    metrics_port: u16,
}

#[derive(Clone, Serialize)]
pub struct ClientSettings {
    pub server_uri: String,
    pub target: String,
    pub node_id: String,
    pub cluster_discovery: bool,
    pub tls: bool,
    pub log_level: String,
    pub metrics_port: u16,
}

fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let node_id = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut config = match &cli.bootstrap {
        Some(path) => Bootstrap::load(path)?.into_client_config(&cli.target, &node_id)?,
        None => {
            let Some(uri) = &cli.server_uri else {
                bail!("no management server: pass --server-uri or --bootstrap");
            };
            let mut config = ClientConfig::new(uri.clone(), &cli.target);
            config.node.id = node_id;
            config
        }
    };
    if let Some(uri) = &cli.server_uri {
        config.server_uri.clone_from(uri);
    }
    config.cluster_discovery = cli.cluster_discovery;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = client_config(&cli).context("failed to resolve client configuration")?;
    info!(
        server = %config.server_uri,
        node = %config.node.id,
        cluster_discovery = config.cluster_discovery,
        "starting xds-client"
    );

    let settings = ClientSettings {
        server_uri: config.server_uri.clone(),
        target: cli.target.clone(),
        node_id: config.node.id.clone(),
        cluster_discovery: config.cluster_discovery,
        tls: config.credentials.is_some(),
        log_level: cli.log_level.clone(),
        metrics_port: cli.metrics_port,
    };

    let metrics = Arc::new(ClientMetrics::new());
    let state = Arc::new(ClientState::default());
    let client = AdsClient::new(
        config,
        GrpcConnector,
        Arc::new(LoggingHandler::new(state.clone())),
    )
    .with_metrics(metrics.clone());

    let debug_handle = tokio::spawn(debug::serve(cli.metrics_port, settings, metrics, state));

    let mut run_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    // Wait for shutdown signal (SIGINT or SIGTERM), or for the client to stop on its own.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let early_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        _ = sigterm.recv() => None,
        result = &mut run_handle => Some(result),
    };

    info!("shutting down...");
    client.close();
    debug_handle.abort();

    let result = match early_exit {
        Some(result) => result,
        None => run_handle.await,
    };
    match result.context("discovery task panicked")? {
        Ok(()) => {
            info!("xds-client stopped");
            Ok(())
        }
        Err(e) => {
            error!("discovery client failed: {e:#}");
            Err(e)
        }
    }
}
