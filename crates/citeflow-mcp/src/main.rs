mod server;

use anyhow::{Context, Result};
use citeflow_core::{AcademicSearch, ConfigLoader, ResearchToolkit, RetryPolicy, TelemetryOptions, init_telemetry};
use rmcp::{ServiceExt, transport::io::stdio};
use server::CiteflowMcpServer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = ConfigLoader::load(None)?;
    // stdout carries the protocol; logs go to stderr without colour codes.
    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        with_ansi: false,
        with_target: true,
    })?;
    citeflow_core::metrics::init_metrics_from_env("citeflow-mcp");

    let toolkit = ResearchToolkit::from_config(&config).context("failed to configure research services")?;

    // Paper lookups stay available even when the research graph skips them.
    let mut academic_config = config.academic.clone();
    academic_config.enabled = true;
    let papers = AcademicSearch::from_config(&academic_config, RetryPolicy::from(&config.retry))?;

    info!(model = toolkit.model_name(), providers = ?papers.provider_ids(), "starting citeflow MCP server on stdio");
    let service = CiteflowMcpServer::new(toolkit, papers)
        .serve(stdio())
        .await
        .context("MCP server failed to start")?;
    let reason = service.waiting().await.context("MCP server task failed")?;
    info!(?reason, "MCP server stopped");

    Ok(())
}
