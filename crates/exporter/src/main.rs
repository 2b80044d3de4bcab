//! Addon exporter - republishes kops addon annotations as Prometheus gauges
//!
//! Polls the annotations of one namespace (`kube-system` by default) and
//! serves the derived `kops_channel_updated` gauges on `/metrics`.

use addon_exporter::{
    api,
    config::{Cli, ExporterConfig},
};
use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::{
    AddonRegistry, ExporterMetrics, HealthState, KubeNamespaceSource, PollerBuilder,
    StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let config = ExporterConfig::load(&cli)?;
    let addrs = config.listen_addrs().await?;
    info!(
        namespace = %config.namespace,
        in_cluster = config.in_cluster,
        encoding = %config.encoding,
        "Exporter configured"
    );

    let registry = AddonRegistry::new(config.encoding.encoder())
        .context("Failed to create metric registry")?;
    let metrics = ExporterMetrics::register(registry.prometheus())
        .context("Failed to register exporter metrics")?;
    let health = HealthState::new();

    let source = KubeNamespaceSource::connect(&config.client_mode()).await?;

    let poller = PollerBuilder::new()
        .source(Arc::new(source))
        .registry(registry.clone())
        .metrics(metrics)
        .health(health.clone())
        .config(config.poller_config())
        .build()?;

    let logger = StructuredLogger::new(&config.namespace);
    logger.log_startup(
        EXPORTER_VERSION,
        &config.listen_address,
        &config.encoding.to_string(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let app_state = Arc::new(api::AppState::new(registry, health));

    let mut api_handle = tokio::spawn(api::serve(addrs, app_state, shutdown_tx.subscribe()));
    let mut poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));

    // A failed poller takes the whole process down; the supervisor restarts it
    tokio::select! {
        result = &mut poller_handle => {
            logger.log_shutdown("addon poller stopped");
            result
                .context("Addon poller panicked")?
                .context("Addon poller failed")?;
            anyhow::bail!("Addon poller exited unexpectedly");
        }
        result = &mut api_handle => {
            logger.log_shutdown("API server stopped");
            result.context("API server panicked")??;
            anyhow::bail!("API server exited unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = tokio::join!(api_handle, poller_handle);
    info!("Shutting down");

    Ok(())
}
