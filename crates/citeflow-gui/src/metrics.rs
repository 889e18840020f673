use tracing::info;

pub fn otel_endpoint_configured(endpoint: &str) {
    info!(
        target = "telemetry.gui",
        endpoint,
        "OpenTelemetry endpoint configured; install an OTLP meter provider to export research metrics"
    );
}

pub fn run_started(run_id: &str, running: usize, available_permits: usize) {
    info!(
        target = "telemetry.gui",
        run_id,
        running_runs = running,
        available_permits,
        event = "run_started"
    );
}

pub fn run_completed(run_id: &str, sources: usize, citations: usize, running: usize) {
    info!(
        target = "telemetry.gui",
        run_id,
        sources,
        citations,
        running_runs = running,
        event = "run_completed"
    );
}

pub fn run_failed(run_id: &str, running: usize, error: &str) {
    info!(
        target = "telemetry.gui",
        run_id,
        running_runs = running,
        error,
        event = "run_failed"
    );
}

pub fn report_downloaded(run_id: &str, format: &str, bytes: usize) {
    info!(
        target = "telemetry.gui",
        run_id,
        format,
        bytes,
        event = "report_downloaded"
    );
}

pub fn stream_opened(run_id: &str, active_streams: usize) {
    info!(
        target = "telemetry.gui",
        run_id,
        active_streams,
        event = "stream_opened"
    );
}
