use crate::{config::AppConfig, metrics};
use anyhow::Result;
use citeflow_core::{TelemetryOptions, init_telemetry};

pub fn init_tracing(config: &AppConfig, level: &str) -> Result<()> {
    init_telemetry(TelemetryOptions {
        env_filter: Some(level.to_string()),
        with_target: true,
        ..TelemetryOptions::default()
    })?;
    citeflow_core::metrics::init_metrics_from_env("citeflow-gui");

    if let Some(endpoint) = config.otel_endpoint.as_deref() {
        metrics::otel_endpoint_configured(endpoint);
    }

    Ok(())
}
