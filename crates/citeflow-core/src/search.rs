//! Web search: the LinkUp client, focus-based query shaping and the per-run
//! search budget.

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::SearchConfig;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::source::Source;
use crate::{CiteflowError, Result, SecretValue, require_env};

/// Search emphasis; decides query enhancement and depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchFocus {
    #[default]
    General,
    Academic,
    News,
    Technical,
}

impl SearchFocus {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchFocus::General => "general",
            SearchFocus::Academic => "academic",
            SearchFocus::News => "news",
            SearchFocus::Technical => "technical",
        }
    }
}

impl fmt::Display for SearchFocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchFocus {
    type Err = CiteflowError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(SearchFocus::General),
            "academic" => Ok(SearchFocus::Academic),
            "news" => Ok(SearchFocus::News),
            "technical" => Ok(SearchFocus::Technical),
            other => Err(CiteflowError::InvalidConfiguration(format!(
                "unknown focus `{other}` (expected general, academic, news or technical)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Standard,
    Deep,
}

impl SearchDepth {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchDepth::Standard => "standard",
            SearchDepth::Deep => "deep",
        }
    }
}

/// Add site and keyword hints for the requested focus.
pub fn enhance_query(query: &str, focus: SearchFocus) -> String {
    match focus {
        SearchFocus::Academic => format!(
            "{query} site:arxiv.org OR site:pubmed.ncbi.nlm.nih.gov OR site:scholar.google.com OR \"research paper\" OR \"study\""
        ),
        SearchFocus::News => format!(
            "{query} site:reuters.com OR site:bbc.com OR site:nytimes.com OR \"news\" OR \"latest\""
        ),
        SearchFocus::Technical => format!(
            "{query} site:github.com OR site:stackoverflow.com OR \"technical\" OR \"implementation\""
        ),
        SearchFocus::General => query.to_string(),
    }
}

/// Academic and technical searches, and queries mentioning research, go deep.
pub fn effective_depth(query: &str, focus: SearchFocus, requested: SearchDepth) -> SearchDepth {
    let wants_deep = matches!(focus, SearchFocus::Academic | SearchFocus::Technical)
        || query.to_lowercase().contains("research");
    if wants_deep { SearchDepth::Deep } else { requested }
}

/// One result returned by a web-search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl SearchHit {
    pub fn to_source(&self) -> Source {
        Source::from_web(&self.title, &self.url, snippet_of(&self.content, 300))
            .with_date(self.date.clone())
    }
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, depth: SearchDepth) -> Result<Vec<SearchHit>>;
}

/// Client for the LinkUp search API.
pub struct LinkupClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretValue,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkupRequest<'a> {
    q: &'a str,
    depth: &'static str,
    output_type: &'static str,
}

#[derive(Deserialize)]
struct LinkupResponse {
    #[serde(default)]
    results: Vec<LinkupResult>,
}

#[derive(Deserialize)]
struct LinkupResult {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    date: Option<String>,
}

impl LinkupClient {
    pub fn new(api_key: SecretValue, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("citeflow/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| CiteflowError::InvalidConfiguration(format!("http client: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = require_env(&config.api_key_env)?;
        Self::new(
            api_key,
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl WebSearch for LinkupClient {
    fn name(&self) -> &str {
        "linkup"
    }

    #[instrument(name = "linkup.search", skip(self), fields(depth = depth.as_str()))]
    async fn search(&self, query: &str, depth: SearchDepth) -> Result<Vec<SearchHit>> {
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&LinkupRequest {
                q: query,
                depth: depth.as_str(),
                output_type: "searchResults",
            })
            .send()
            .await
            .map_err(|err| CiteflowError::transport("linkup", err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CiteflowError::from_status("linkup", status.as_u16(), &body));
        }

        let payload: LinkupResponse = response
            .json()
            .await
            .map_err(|err| CiteflowError::transport("linkup", err))?;

        let hits: Vec<SearchHit> = payload
            .results
            .into_iter()
            .filter(|result| !result.url.trim().is_empty())
            .filter(|result| result.kind.as_deref().is_none_or(|kind| kind == "text"))
            .map(|result| SearchHit {
                title: result.name,
                url: result.url,
                content: result.content,
                date: result.date,
            })
            .collect();

        debug!(hits = hits.len(), "linkup returned results");
        Ok(hits)
    }
}

/// Per-run cap on web searches.
#[derive(Debug)]
pub struct SearchBudget {
    used: AtomicUsize,
    max: usize,
}

impl SearchBudget {
    pub fn new(max: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            max,
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.max
    }

    /// Count a completed search; returns the new total.
    fn record(&self) -> usize {
        self.used.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub count: usize,
    pub max: usize,
    pub depth: SearchDepth,
    pub focus: SearchFocus,
    pub results_text: String,
    pub sources: Vec<Source>,
}

impl SearchReport {
    /// Text handed to the writer as a research finding.
    pub fn summary(&self) -> String {
        format!(
            "Search {}/{} ({} depth) - Focus: {}:\n{}\n\nSources found: {}",
            self.count,
            self.max,
            self.depth.as_str(),
            self.focus,
            self.results_text,
            self.sources.len()
        )
    }
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Completed(SearchReport),
    BudgetExhausted { max: usize },
}

impl SearchOutcome {
    pub fn message(&self) -> String {
        match self {
            SearchOutcome::Completed(report) => report.summary(),
            SearchOutcome::BudgetExhausted { max } => format!(
                "Maximum search limit ({max}) reached. Please analyze existing results."
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchToolSettings {
    pub rate_limit: Duration,
    pub max_result_chars: usize,
    pub retry: RetryPolicy,
}

impl SearchToolSettings {
    pub fn from_config(search: &SearchConfig, retry: RetryPolicy) -> Self {
        Self {
            rate_limit: Duration::from_millis(search.rate_limit_ms),
            max_result_chars: search.max_result_chars,
            retry,
        }
    }
}

/// Web search with focus shaping, rate limiting, budget and source extraction.
#[derive(Clone)]
pub struct SearchTool {
    backend: Arc<dyn WebSearch>,
    budget: Arc<SearchBudget>,
    settings: SearchToolSettings,
}

impl SearchTool {
    pub fn new(backend: Arc<dyn WebSearch>, budget: Arc<SearchBudget>, settings: SearchToolSettings) -> Self {
        Self {
            backend,
            budget,
            settings,
        }
    }

    pub fn budget(&self) -> &SearchBudget {
        &self.budget
    }

    pub async fn run(&self, query: &str, focus: SearchFocus, depth: SearchDepth) -> Result<SearchOutcome> {
        if self.budget.is_exhausted() {
            info!(max = self.budget.max(), "search budget exhausted");
            return Ok(SearchOutcome::BudgetExhausted {
                max: self.budget.max(),
            });
        }

        if !self.settings.rate_limit.is_zero() {
            tokio::time::sleep(self.settings.rate_limit).await;
        }

        let enhanced = enhance_query(query, focus);
        let depth = effective_depth(query, focus, depth);
        let backend = self.backend.clone();

        let hits = self
            .settings
            .retry
            .run("web.search", || {
                let backend = backend.clone();
                let enhanced = enhanced.clone();
                async move { backend.search(&enhanced, depth).await }
            })
            .await
            .inspect_err(|err| {
                warn!(backend = self.backend.name(), focus = %focus, error = %err, "web search failed");
                metrics::record_search(focus.as_str(), "failed");
            })?;

        let count = self.budget.record();
        metrics::record_search(focus.as_str(), "completed");

        let sources: Vec<Source> = hits.iter().map(SearchHit::to_source).collect();
        let results_text = truncate_with_marker(
            &render_hits(&hits),
            self.settings.max_result_chars,
            &format!("\n... [Results truncated, search {count} using {} depth]", depth.as_str()),
        );

        info!(
            search = count,
            max = self.budget.max(),
            focus = %focus,
            depth = depth.as_str(),
            sources = sources.len(),
            "web search completed"
        );

        Ok(SearchOutcome::Completed(SearchReport {
            count,
            max: self.budget.max(),
            depth,
            focus,
            results_text,
            sources,
        }))
    }
}

fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results returned.".to_string();
    }

    let mut output = String::new();
    for (index, hit) in hits.iter().enumerate() {
        let _ = writeln!(output, "{}. {}", index + 1, hit.title);
        let _ = writeln!(output, "   URL: {}", hit.url);
        if let Some(date) = &hit.date {
            let _ = writeln!(output, "   Date: {date}");
        }
        if !hit.content.trim().is_empty() {
            let _ = writeln!(output, "   {}", hit.content.trim());
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}

fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(marker);
    truncated
}

pub(crate) fn snippet_of(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut snippet: String = trimmed.chars().take(max_chars).collect();
    snippet.push_str("...");
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RecordingSearch {
        queries: Mutex<Vec<(String, SearchDepth)>>,
    }

    #[async_trait]
    impl WebSearch for RecordingSearch {
        fn name(&self) -> &str {
            "recording"
        }

        async fn search(&self, query: &str, depth: SearchDepth) -> Result<Vec<SearchHit>> {
            self.queries.lock().unwrap().push((query.to_string(), depth));
            Ok(vec![SearchHit {
                title: "Result".into(),
                url: "https://example.com/r".into(),
                content: "x".repeat(50),
                date: None,
            }])
        }
    }

    fn tool(max: usize, max_chars: usize) -> (SearchTool, Arc<RecordingSearch>) {
        let backend = Arc::new(RecordingSearch {
            queries: Mutex::new(Vec::new()),
        });
        let tool = SearchTool::new(
            backend.clone(),
            Arc::new(SearchBudget::new(max)),
            SearchToolSettings {
                rate_limit: Duration::ZERO,
                max_result_chars: max_chars,
                retry: RetryPolicy::none(),
            },
        );
        (tool, backend)
    }

    #[test]
    fn focus_enhancement_matches_expected_hints() {
        assert_eq!(enhance_query("rust", SearchFocus::General), "rust");
        assert!(enhance_query("rust", SearchFocus::Academic).contains("site:arxiv.org"));
        assert!(enhance_query("rust", SearchFocus::News).contains("site:reuters.com"));
        assert!(enhance_query("rust", SearchFocus::Technical).contains("site:github.com"));
    }

    #[test]
    fn depth_rules() {
        assert_eq!(
            effective_depth("battery", SearchFocus::General, SearchDepth::Standard),
            SearchDepth::Standard
        );
        assert_eq!(
            effective_depth("battery", SearchFocus::Technical, SearchDepth::Standard),
            SearchDepth::Deep
        );
        assert_eq!(
            effective_depth("Battery Research trends", SearchFocus::News, SearchDepth::Standard),
            SearchDepth::Deep
        );
    }

    #[tokio::test]
    async fn budget_stops_searches_without_calling_backend() {
        let (tool, backend) = tool(2, 5000);

        for _ in 0..2 {
            let outcome = tool
                .run("solid state batteries", SearchFocus::General, SearchDepth::Standard)
                .await
                .unwrap();
            assert!(matches!(outcome, SearchOutcome::Completed(_)));
        }

        let outcome = tool
            .run("solid state batteries", SearchFocus::News, SearchDepth::Standard)
            .await
            .unwrap();
        assert!(outcome.message().contains("Maximum search limit (2) reached"));
        assert_eq!(backend.queries.lock().unwrap().len(), 2);
        assert_eq!(tool.budget().used(), 2);
    }

    #[tokio::test]
    async fn report_text_is_truncated_with_marker() {
        let (tool, backend) = tool(8, 20);
        let outcome = tool
            .run("graphene", SearchFocus::Academic, SearchDepth::Standard)
            .await
            .unwrap();

        let SearchOutcome::Completed(report) = outcome else {
            panic!("expected completed search");
        };
        assert!(report.results_text.contains("[Results truncated, search 1 using deep depth]"));
        assert!(report.summary().starts_with("Search 1/8 (deep depth) - Focus: academic:"));
        assert!(report.summary().ends_with("Sources found: 1"));

        let queries = backend.queries.lock().unwrap();
        assert!(queries[0].0.contains("site:arxiv.org"));
        assert_eq!(queries[0].1, SearchDepth::Deep);
    }

    #[tokio::test]
    async fn linkup_client_parses_text_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"depth": "deep", "outputType": "searchResults"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"type": "text", "name": "Nature article", "url": "https://www.nature.com/articles/abc", "content": "Findings"},
                    {"type": "image", "name": "Figure", "url": "https://img.example.com/1.png"},
                    {"type": "text", "name": "Blank", "url": ""}
                ]
            })))
            .mount(&server)
            .await;

        let client = LinkupClient::new(
            SecretValue::new("test-key"),
            format!("{}/v1", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        let hits = client.search("perovskite", SearchDepth::Deep).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Nature article");
        assert_eq!(hits[0].to_source().source_type, crate::source::SourceType::Paper);
    }

    #[tokio::test]
    async fn linkup_rate_limit_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = LinkupClient::new(
            SecretValue::new("k"),
            format!("{}/v1", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client.search("q", SearchDepth::Standard).await.unwrap_err();
        assert!(matches!(err, CiteflowError::RateLimited { .. }));
    }
}
