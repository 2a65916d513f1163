use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Handle used by the `/metrics` endpoint to render the Prometheus text format.
#[derive(Clone)]
pub struct MetricsHandle(PrometheusHandle);

impl MetricsHandle {
    pub fn render(&self) -> String {
        self.0.render()
    }
}

/// Installs the global Prometheus recorder. Call once per process.
pub fn init_metrics() -> Result<MetricsHandle, anyhow::Error> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    Ok(MetricsHandle(handle))
}
