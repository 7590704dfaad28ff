//! Prometheus metrics exporter
//!
//! Exposes metrics via HTTP for Prometheus scraping.

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Disable to skip installing the exporter entirely
    pub enabled: bool,

    /// Address the scrape endpoint binds to
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

/// Errors that can occur during metrics setup
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to setup metrics: {0}")]
    SetupFailed(String),
}

/// Install the Prometheus recorder and its HTTP listener.
///
/// Can only install once per process; later calls return the existing handle.
pub fn start_metrics_server(
    config: &MetricsConfig,
) -> Result<&'static PrometheusHandle, MetricsError> {
    init_metrics();

    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .install_recorder()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Render metrics as text, if the exporter is installed
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}
