use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{AcademicProvider, check_status, http_client};
use crate::search::snippet_of;
use crate::source::Source;
use crate::{CiteflowError, Result};

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const FIELDS: &str = "title,url,abstract,year,publicationDate,authors,venue,externalIds";

/// Semantic Scholar graph API. Stands in for Google Scholar, which has no public API.
pub struct SemanticScholarProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    paper_id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    publication_date: Option<String>,
    #[serde(default)]
    authors: Vec<PaperAuthor>,
    venue: Option<String>,
    external_ids: Option<ExternalIds>,
}

#[derive(Deserialize)]
struct PaperAuthor {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

impl SemanticScholarProvider {
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
}

fn into_source(paper: Paper) -> Option<Source> {
    let title = paper.title.filter(|title| !title.trim().is_empty())?;
    let url = paper
        .url
        .or_else(|| {
            paper
                .paper_id
                .as_ref()
                .map(|id| format!("https://www.semanticscholar.org/paper/{id}"))
        })?;
    let date = paper
        .publication_date
        .or_else(|| paper.year.map(|year| year.to_string()));

    Some(
        Source::paper(title.trim(), url)
            .with_snippet(snippet_of(paper.abstract_text.as_deref().unwrap_or_default(), 400))
            .with_authors(paper.authors.into_iter().filter_map(|author| author.name).collect())
            .with_date(date)
            .with_doi(paper.external_ids.and_then(|ids| ids.doi))
            .with_journal(paper.venue),
    )
}

#[async_trait]
impl AcademicProvider for SemanticScholarProvider {
    fn id(&self) -> &'static str {
        "semantic_scholar"
    }

    #[instrument(name = "academic.semantic_scholar", skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>> {
        let response = self
            .http
            .get(format!("{}/paper/search", self.base_url))
            .query(&[
                ("query", query.to_string()),
                ("limit", max_results.min(100).to_string()),
                ("fields", FIELDS.to_string()),
            ])
            .send()
            .await
            .map_err(|err| CiteflowError::transport("semantic_scholar", err))?;

        let payload: SearchResponse = check_status("semantic_scholar", response)
            .await?
            .json()
            .await
            .map_err(|err| CiteflowError::transport("semantic_scholar", err))?;

        let sources: Vec<Source> = payload.data.into_iter().filter_map(into_source).collect();
        debug!(hits = sources.len(), "semantic scholar results parsed");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn papers_fall_back_to_year_and_canonical_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param("query", "transformers"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 2,
                "data": [
                    {
                        "paperId": "abc123",
                        "title": "Attention Is All You Need",
                        "url": null,
                        "abstract": null,
                        "year": 2017,
                        "authors": [{"authorId": "1", "name": "Ashish Vaswani"}],
                        "venue": "NeurIPS",
                        "externalIds": {"DOI": "10.5555/3295222"}
                    },
                    {"paperId": "zzz", "title": null}
                ]
            })))
            .mount(&server)
            .await;

        let provider = SemanticScholarProvider::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let sources = provider.search("transformers", 2).await.unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://www.semanticscholar.org/paper/abc123");
        assert_eq!(sources[0].publication_date.as_deref(), Some("2017"));
        assert_eq!(sources[0].journal.as_deref(), Some("NeurIPS"));
        assert_eq!(sources[0].authors, vec!["Ashish Vaswani"]);
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let provider = SemanticScholarProvider::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let err = provider.search("q", 2).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
