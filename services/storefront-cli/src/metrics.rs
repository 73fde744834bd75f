//! Prometheus recorder for the CLI
//!
//! The client crates emit `auth_*` metrics through the `metrics` facade; this
//! installs the recorder that collects them so `--metrics` can print the
//! text exposition on exit.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Refresh round trips run from a few ms up to the transport timeout.
const REFRESH_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("auth_refresh_duration_seconds".to_string()),
            REFRESH_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the global recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
