use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{AcademicProvider, check_status, clean_markup, http_client};
use crate::source::Source;
use crate::{CiteflowError, Result};

const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// PubMed via NCBI E-utilities: `esearch` for ids, then `esummary` for metadata.
pub struct PubmedProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchEnvelope {
    esearchresult: SearchResult,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Deserialize)]
struct SummaryEnvelope {
    result: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct Summary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    pubdate: Option<String>,
    #[serde(default)]
    authors: Vec<SummaryAuthor>,
    #[serde(default)]
    fulljournalname: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    articleids: Vec<ArticleId>,
}

#[derive(Deserialize)]
struct SummaryAuthor {
    name: String,
}

#[derive(Deserialize)]
struct ArticleId {
    idtype: String,
    value: String,
}

impl PubmedProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn search_ids(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&[
                ("db", "pubmed".to_string()),
                ("term", query.to_string()),
                ("retmax", max_results.to_string()),
                ("retmode", "json".to_string()),
            ])
            .send()
            .await
            .map_err(|err| CiteflowError::transport("pubmed", err))?;

        let envelope: SearchEnvelope = check_status("pubmed", response)
            .await?
            .json()
            .await
            .map_err(|err| CiteflowError::transport("pubmed", err))?;
        Ok(envelope.esearchresult.idlist)
    }

    async fn summaries(&self, ids: &[String]) -> Result<Vec<Source>> {
        let response = self
            .http
            .get(format!("{}/esummary.fcgi", self.base_url))
            .query(&[
                ("db", "pubmed".to_string()),
                ("id", ids.join(",")),
                ("retmode", "json".to_string()),
            ])
            .send()
            .await
            .map_err(|err| CiteflowError::transport("pubmed", err))?;

        let envelope: SummaryEnvelope = check_status("pubmed", response)
            .await?
            .json()
            .await
            .map_err(|err| CiteflowError::transport("pubmed", err))?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                let raw = envelope.result.get(id)?.clone();
                let summary: Summary = serde_json::from_value(raw).ok()?;
                into_source(id, summary)
            })
            .collect())
    }
}

fn into_source(id: &str, summary: Summary) -> Option<Source> {
    let title = clean_markup(&summary.title);
    if title.is_empty() {
        return None;
    }
    let doi = summary
        .articleids
        .iter()
        .find(|article| article.idtype.eq_ignore_ascii_case("doi"))
        .map(|article| article.value.clone());

    Some(
        Source::paper(
            title.trim_end_matches('.').to_string(),
            format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"),
        )
        .with_authors(summary.authors.into_iter().map(|author| author.name).collect())
        .with_date(summary.pubdate)
        .with_doi(doi)
        .with_journal(summary.fulljournalname.or(summary.source)),
    )
}

#[async_trait]
impl AcademicProvider for PubmedProvider {
    fn id(&self) -> &'static str {
        "pubmed"
    }

    #[instrument(name = "academic.pubmed", skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>> {
        let ids = self.search_ids(query, max_results).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sources = self.summaries(&ids).await?;
        debug!(ids = ids.len(), hits = sources.len(), "pubmed summaries parsed");
        Ok(sources)
    }
}
