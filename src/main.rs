//! Cluster Resource Override - mutating admission webhook for Pod resources

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cluster_resource_override::store::ClusterCache;
use cluster_resource_override::webhook::{self, WebhookState};
use cluster_resource_override::{OverrideAdmission, OverrideConfig, DEFAULT_BIND_ADDRESS};

/// Rewrites Pod container requests and limits from cluster-wide ratios
#[derive(Parser, Debug)]
#[command(name = "cluster-resource-override", version, about, long_about = None)]
struct Cli {
    /// Path to the ClusterResourceOverrideConfig YAML file
    #[arg(long, env = "CLUSTER_RESOURCE_OVERRIDE_CONFIG")]
    config: PathBuf,

    /// Address the HTTPS webhook listens on
    #[arg(long, env = "BIND_ADDRESS", default_value = DEFAULT_BIND_ADDRESS)]
    bind_address: SocketAddr,

    /// PEM certificate chain served by the webhook
    #[arg(long, env = "TLS_CERT_FILE")]
    tls_cert_file: PathBuf,

    /// PEM private key for the certificate
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE")]
    tls_private_key_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // aws-lc-rs must be the process-wide provider before any TLS config is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = OverrideConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    // The server comes up first so probes answer while the caches sync
    let state = Arc::new(WebhookState::new());
    let server_state = state.clone();
    let (addr, cert, key) = (cli.bind_address, cli.tls_cert_file, cli.tls_private_key_file);
    let server = tokio::spawn(async move {
        if let Err(e) = webhook::serve(server_state, addr, &cert, &key).await {
            error!(error = %e, "Webhook server error");
            return Err(e);
        }
        Ok(())
    });

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;
    let cache = ClusterCache::spawn(client);
    cache.wait_until_ready().await?;

    let engine = OverrideAdmission::new(
        config,
        Arc::new(cache.namespaces.clone()),
        Arc::new(cache.limit_ranges.clone()),
    );
    state.initialize(engine).await?;
    info!("Cluster resource override admission ready");

    tokio::select! {
        result = server => {
            result.context("webhook server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
