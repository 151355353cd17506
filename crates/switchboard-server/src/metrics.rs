//! Prometheus export for broker metrics.
//!
//! The broker records through the `metrics` facade; this module installs the
//! recorder that serves them.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Start the Prometheus metrics server and describe broker metrics.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    switchboard_core::metrics::describe();

    info!("Metrics server listening on {}", addr);
    Ok(())
}
