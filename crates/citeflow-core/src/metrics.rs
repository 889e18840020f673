use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct ResearchMetrics {
    runs: Counter<u64>,
    duration_ms: Histogram<f64>,
    searches: Counter<u64>,
    sources: Histogram<f64>,
}

static METRICS: OnceCell<ResearchMetrics> = OnceCell::new();

fn handles() -> &'static ResearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("citeflow.research");
        ResearchMetrics {
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Total research runs by outcome")
                .init(),
            duration_ms: meter
                .f64_histogram("research_duration_ms")
                .with_description("Research run wall time in milliseconds")
                .init(),
            searches: meter
                .u64_counter("web_searches_total")
                .with_description("Web searches issued by focus and status")
                .init(),
            sources: meter
                .f64_histogram("research_sources")
                .with_description("Deduplicated sources per completed run")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("CITEFLOW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "CITEFLOW_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export research metrics."
        );
    }
}

/// Record one finished research run (no-op if no provider installed).
pub fn record_research_run(status: &str, duration_ms: u64, sources: usize) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];

    metrics.runs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
    if status == "completed" {
        metrics.sources.record(sources as f64, &attrs);
    }
}

pub fn record_search(focus: &str, status: &str) {
    let attrs = [
        KeyValue::new("focus", focus.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    handles().searches.add(1, &attrs);
}
