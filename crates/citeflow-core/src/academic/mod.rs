//! Academic metadata lookups. Every provider maps its API response onto
//! [`Source`] records of type `paper`; [`AcademicSearch`] fans a query out to
//! all configured providers at once.

mod arxiv;
mod crossref;
mod pubmed;
mod semantic;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

pub use arxiv::ArxivProvider;
pub use crossref::CrossrefProvider;
pub use pubmed::PubmedProvider;
pub use semantic::SemanticScholarProvider;

use crate::config::AcademicConfig;
use crate::retry::RetryPolicy;
use crate::source::{Source, dedup_sources};
use crate::{CiteflowError, Result};

#[async_trait]
pub trait AcademicProvider: Send + Sync {
    fn id(&self) -> &'static str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AcademicResults {
    pub sources: Vec<Source>,
    pub failures: Vec<ProviderFailure>,
}

/// Concurrent lookup across a set of providers.
#[derive(Clone)]
pub struct AcademicSearch {
    providers: Vec<Arc<dyn AcademicProvider>>,
    max_results: usize,
    retry: RetryPolicy,
}

impl AcademicSearch {
    pub fn new(providers: Vec<Arc<dyn AcademicProvider>>, max_results: usize, retry: RetryPolicy) -> Self {
        Self {
            providers,
            max_results: max_results.max(1),
            retry,
        }
    }

    pub fn from_config(config: &AcademicConfig, retry: RetryPolicy) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut providers: Vec<Arc<dyn AcademicProvider>> = Vec::new();

        if config.enabled {
            for name in &config.providers {
                let provider: Arc<dyn AcademicProvider> = match name.trim().to_ascii_lowercase().as_str() {
                    "arxiv" => Arc::new(ArxivProvider::new(timeout)?),
                    "crossref" => Arc::new(CrossrefProvider::new(timeout, config.mailto.clone())?),
                    "pubmed" => Arc::new(PubmedProvider::new(timeout)?),
                    "semantic_scholar" | "semanticscholar" => Arc::new(SemanticScholarProvider::new(timeout)?),
                    other => {
                        return Err(CiteflowError::InvalidConfiguration(format!(
                            "unknown academic provider `{other}`"
                        )));
                    }
                };
                providers.push(provider);
            }
        }

        Ok(Self::new(providers, config.max_results, retry))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|provider| provider.id()).collect()
    }

    /// Query every provider concurrently with the configured per-provider limit.
    pub async fn search(&self, query: &str) -> AcademicResults {
        self.search_with_limit(query, self.max_results, None).await
    }

    /// Query every provider for `per_provider` hits. Results are interleaved
    /// provider by provider, deduplicated and capped at `total` when given.
    pub async fn search_with_limit(&self, query: &str, per_provider: usize, total: Option<usize>) -> AcademicResults {
        let lookups = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            let retry = self.retry;
            async move {
                let outcome = retry
                    .run(provider.id(), || provider.search(query, per_provider))
                    .await;
                (provider.id(), outcome)
            }
        });

        let mut batches = Vec::new();
        let mut failures = Vec::new();
        for (provider, outcome) in join_all(lookups).await {
            match outcome {
                Ok(sources) => {
                    info!(provider, hits = sources.len(), "academic lookup completed");
                    batches.push(sources);
                }
                Err(err) => {
                    warn!(provider, error = %err, "academic lookup failed; skipping provider");
                    failures.push(ProviderFailure {
                        provider: provider.to_string(),
                        reason: crate::redact(&err.to_string()),
                    });
                }
            }
        }

        let mut sources = dedup_sources(interleave(batches));
        if let Some(total) = total {
            sources.truncate(total);
        }

        AcademicResults { sources, failures }
    }
}

fn interleave(batches: Vec<Vec<Source>>) -> Vec<Source> {
    let mut iters: Vec<_> = batches.into_iter().map(Vec::into_iter).collect();
    let mut merged = Vec::new();
    loop {
        let mut progressed = false;
        for iter in iters.iter_mut() {
            if let Some(source) = iter.next() {
                merged.push(source);
                progressed = true;
            }
        }
        if !progressed {
            return merged;
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("citeflow/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|err| CiteflowError::InvalidConfiguration(format!("http client: {err}")))
}

pub(crate) async fn check_status(service: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CiteflowError::from_status(service, status.as_u16(), &body))
}

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("invalid tag regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

/// Strip markup tags, decode the common XML entities and collapse whitespace.
pub(crate) fn clean_markup(text: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(text, " ");
    let decoded = stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}
