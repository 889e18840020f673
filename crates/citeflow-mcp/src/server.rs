use std::sync::Arc;

use citeflow_core::report::{citations, json, markdown};
use citeflow_core::{
    AcademicSearch, CitationStyle, CiteflowError, ResearchOptions, ResearchOutcome, ResearchToolkit, SearchFocus,
    SourceStatistics, collect_sources,
};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

const NO_SOURCES: &str = "No sources available from recent research session.";

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    10
}

fn default_citation_style() -> String {
    "apa".to_string()
}

/// Parameters for a full research run
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RunResearchParams {
    /// The research question
    pub query: String,
    /// Append detailed information about every source
    #[serde(default = "default_true")]
    pub include_sources: bool,
    /// Force one focus (general, academic, news, technical) for every search
    #[serde(default)]
    pub focus: Option<String>,
}

/// Parameters for a source inventory
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct SourceInfoParams {
    /// Collect sources for this query; omit to describe the most recent run
    #[serde(default)]
    pub query: Option<String>,
}

/// Parameters for an academic paper lookup
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct PaperSearchParams {
    /// Paper search query
    pub query: String,
    /// Maximum number of papers to return
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Parameters for reference formatting
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct FormatCitationsParams {
    /// Report text containing [n] citation markers
    pub content: String,
    /// apa, mla or simple; anything else falls back to simple
    #[serde(default = "default_citation_style")]
    pub citation_style: String,
}

/// MCP server exposing research, source and citation tools.
#[derive(Clone)]
pub struct CiteflowMcpServer {
    toolkit: ResearchToolkit,
    papers: AcademicSearch,
    last_run: Arc<RwLock<Option<Arc<ResearchOutcome>>>>,
    tool_router: ToolRouter<Self>,
}

impl CiteflowMcpServer {
    async fn research_report(&self, params: RunResearchParams) -> Result<String, CiteflowError> {
        let focus = params
            .focus
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(str::parse::<SearchFocus>)
            .transpose()?;
        let options = ResearchOptions::new(&params.query).with_focus(focus);

        let outcome = Arc::new(citeflow_core::run_research(&self.toolkit, options).await?);
        *self.last_run.write().await = Some(outcome.clone());

        let mut report = outcome.result.content.trim_end().to_string();
        if params.include_sources {
            report.push_str(&markdown::detailed_source_info(&outcome.result.sources));
        }
        Ok(report)
    }

    async fn source_info(&self, params: SourceInfoParams) -> Result<String, CiteflowError> {
        match params.query.as_deref().map(str::trim).filter(|query| !query.is_empty()) {
            Some(query) => {
                let collection = collect_sources(&self.toolkit, ResearchOptions::new(query)).await?;
                json::source_info(&collection.sources)
            }
            None => match self.last_run.read().await.as_ref() {
                Some(outcome) => json::source_info(&outcome.result.sources),
                None => Ok(NO_SOURCES.to_string()),
            },
        }
    }

    async fn paper_search(&self, params: PaperSearchParams) -> Result<String, CiteflowError> {
        let max_results = params.max_results.clamp(1, 50);
        let results = self
            .papers
            .search_with_limit(&params.query, max_results, Some(max_results))
            .await;
        for failure in &results.failures {
            warn!(provider = %failure.provider, reason = %failure.reason, "academic provider failed");
        }
        if results.sources.is_empty() {
            if let Some(failure) = results.failures.last() {
                return Err(CiteflowError::api(failure.provider.clone(), failure.reason.clone(), false));
            }
        }
        Ok(markdown::paper_listing(&params.query, &results.sources))
    }

    async fn statistics(&self) -> String {
        let guard = self.last_run.read().await;
        let sources = guard
            .as_ref()
            .map(|outcome| outcome.result.sources.as_slice())
            .unwrap_or_default();
        SourceStatistics::from_sources(sources).render_markdown()
    }

    async fn references(&self, params: FormatCitationsParams) -> String {
        let style = params.citation_style.parse().unwrap_or(CitationStyle::Simple);
        let guard = self.last_run.read().await;
        let sources = guard
            .as_ref()
            .map(|outcome| outcome.result.sources.as_slice())
            .unwrap_or_default();
        citations::append_references(&params.content, sources, style)
    }
}

fn tool_output(result: Result<String, CiteflowError>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(err) => {
            warn!(error = %citeflow_core::redact(&err.to_string()), "tool call failed");
            Ok(CallToolResult::error(vec![Content::text(err.user_message())]))
        }
    }
}

#[tool_router]
impl CiteflowMcpServer {
    pub fn new(toolkit: ResearchToolkit, papers: AcademicSearch) -> Self {
        Self {
            toolkit,
            papers,
            last_run: Arc::new(RwLock::new(None)),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Research a question with web search, academic lookups and an LLM; returns a report with numbered citations and source links"
    )]
    async fn run_research(&self, params: Parameters<RunResearchParams>) -> Result<CallToolResult, McpError> {
        info!(query = %params.0.query, "run_research called");
        tool_output(self.research_report(params.0).await)
    }

    #[tool(
        description = "Structured JSON about research sources: counts per type, sources grouped by type and the full list. Uses the most recent run unless a query is given"
    )]
    async fn get_source_info(&self, params: Parameters<SourceInfoParams>) -> Result<CallToolResult, McpError> {
        tool_output(self.source_info(params.0).await)
    }

    #[tool(description = "Search arXiv, CrossRef, PubMed and Semantic Scholar for academic papers")]
    async fn search_academic_papers(
        &self,
        params: Parameters<PaperSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        tool_output(self.paper_search(params.0).await)
    }

    #[tool(description = "Source type mix, top domains and metadata coverage for the most recent research run")]
    async fn get_source_statistics(&self) -> Result<CallToolResult, McpError> {
        tool_output(Ok(self.statistics().await))
    }

    #[tool(description = "Append a References section (apa, mla or simple) built from the most recent run's sources")]
    async fn format_citations(&self, params: Parameters<FormatCitationsParams>) -> Result<CallToolResult, McpError> {
        tool_output(Ok(self.references(params.0).await))
    }
}

#[tool_handler]
impl ServerHandler for CiteflowMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "citeflow".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Citeflow research tools: run_research produces a cited report; the other tools inspect the sources \
                 of the most recent run, search academic indexes and format reference lists."
                    .into(),
            ),
        }
    }
}
