// Prometheus exporter for the watch scheduler metrics

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Must run inside the tokio runtime. Should be called once at startup.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("failed to start Prometheus metrics exporter")?;

    meshwatch_consul::metrics::describe_metrics();
    info!(port, "Metrics server listening at http://0.0.0.0:{}/metrics", port);
    Ok(())
}
