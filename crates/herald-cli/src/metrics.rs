//! Prometheus export for the client's metrics.
//!
//! The transport records through the `metrics` facade; this installs the
//! recorder and serves it over HTTP.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and describe the transport metrics.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    herald_transport::metrics::describe();

    info!("Metrics server listening on {}", addr);
    Ok(())
}
