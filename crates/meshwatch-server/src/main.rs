//! Main entry point for the meshwatch server.
//!
//! Watches Consul health endpoints and keeps the discovery snapshot current
//! until Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use meshwatch_consul::{BackoffPolicy, CatalogWatcher, ConsulClient, WatchRegistry};
use meshwatch_mesh::{DiscoveryResponder, LoggingDiscoveryServerCallbacks, SnapshotSink};
use meshwatch_server::{metrics, model::Configuration, startup};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let logging_config = configuration.logging_config()?;
    let _logging_guard = startup::init_logging(&logging_config)?;

    if configuration.metrics_enabled() {
        metrics::init_metrics(configuration.metrics_port()?)?;
    }

    let consul_config = configuration.consul_config()?;
    let sink_config = configuration.sink_config()?;

    let snapshot = Arc::new(SnapshotSink::new());
    let callbacks = Arc::new(LoggingDiscoveryServerCallbacks::new(
        configuration.xds_log_full_request(),
        configuration.xds_log_full_response(),
    ));
    let responder = DiscoveryResponder::new(
        configuration.control_plane_id(),
        snapshot.clone(),
        callbacks,
    );

    let registry = Arc::new(
        WatchRegistry::from_config(&consul_config, &sink_config, snapshot.clone())
            .context("failed to create watch registry")?,
    );

    info!(
        consul = %consul_config.base_url(),
        max_requests = consul_config.watcher.max_requests,
        subscription_delay_ms = consul_config.subscription_delay_ms,
        "Starting meshwatch server"
    );

    let shutdown = startup::shutdown_on_signal();
    let catalog_cancel = CancellationToken::new();
    let mut catalog_task = None;

    if configuration.watch_discover_all() {
        let source = Arc::new(ConsulClient::new(
            &consul_config,
            registry.dispatcher().http_client().clone(),
        ));
        let watcher = CatalogWatcher::new(
            registry.clone(),
            source,
            configuration.watch_spec()?,
            BackoffPolicy::from_config(&consul_config.watcher.backoff),
        );
        catalog_task = Some(tokio::spawn(watcher.run(catalog_cancel.clone())));
        info!("Watching every service in the catalog");
    } else {
        let report = registry.reconcile(&configuration.desired_set()?);
        info!(
            created = report.created.len(),
            rejected = ?report.rejected,
            "Watching configured services"
        );
    }

    shutdown.cancelled().await;

    catalog_cancel.cancel();
    if let Some(task) = catalog_task {
        let _ = task.await;
    }
    registry.shutdown().await;

    info!(
        services = snapshot.len(),
        snapshot_version = snapshot.version(),
        open_streams = responder.open_streams(),
        peak_in_flight = registry.dispatcher().peak_in_flight(),
        "Meshwatch server stopped"
    );

    Ok(())
}
