use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument};

use super::{AcademicProvider, check_status, clean_markup, http_client};
use crate::Result;
use crate::search::snippet_of;
use crate::source::Source;

const DEFAULT_BASE_URL: &str = "https://export.arxiv.org/api";

static ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<entry>(.*?)</entry>").expect("invalid entry regex"));
static AUTHOR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<author>\s*<name>(.*?)</name>").expect("invalid author regex"));

fn element(entry: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>", tag = regex::escape(tag));
    Regex::new(&pattern)
        .ok()?
        .captures(entry)
        .map(|caps| clean_markup(&caps[1]))
        .filter(|value| !value.is_empty())
}

/// arXiv Atom API.
pub struct ArxivProvider {
    http: reqwest::Client,
    base_url: String,
}

impl ArxivProvider {
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

pub(crate) fn parse_feed(feed: &str) -> Vec<Source> {
    ENTRY
        .captures_iter(feed)
        .filter_map(|caps| {
            let entry = &caps[1];
            let title = element(entry, "title")?;
            let url = element(entry, "id")?;
            let authors = AUTHOR_NAME
                .captures_iter(entry)
                .map(|author| clean_markup(&author[1]))
                .collect();
            let published = element(entry, "published").map(|date| date.chars().take(10).collect());

            Some(
                Source::paper(title, url)
                    .with_snippet(snippet_of(&element(entry, "summary").unwrap_or_default(), 400))
                    .with_authors(authors)
                    .with_date(published)
                    .with_doi(element(entry, "arxiv:doi"))
                    .with_journal(element(entry, "arxiv:journal_ref").or_else(|| Some("arXiv".to_string()))),
            )
        })
        .collect()
}

#[async_trait]
impl AcademicProvider for ArxivProvider {
    fn id(&self) -> &'static str {
        "arxiv"
    }

    #[instrument(name = "academic.arxiv", skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>> {
        let response = self
            .http
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("search_query", format!("all:{query}")),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|err| crate::CiteflowError::transport("arxiv", err))?;

        let feed = check_status("arxiv", response)
            .await?
            .text()
            .await
            .map_err(|err| crate::CiteflowError::transport("arxiv", err))?;

        let sources = parse_feed(&feed);
        debug!(hits = sources.len(), "arxiv feed parsed");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/2401.01234v1</id>
    <published>2024-01-03T18:59:59Z</published>
    <title>Solid-State Electrolytes:
      A Survey</title>
    <summary>  We review &amp; compare electrolytes.  </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <arxiv:doi xmlns:arxiv="http://arxiv.org/schemas/atom">10.1000/ABC</arxiv:doi>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2402.00001v2</id>
    <title>Second</title>
  </entry>
</feed>"#;

    #[test]
    fn feed_entries_become_papers() {
        let sources = parse_feed(FEED);
        assert_eq!(sources.len(), 2);

        let first = &sources[0];
        assert_eq!(first.title, "Solid-State Electrolytes: A Survey");
        assert_eq!(first.url, "http://arxiv.org/abs/2401.01234v1");
        assert_eq!(first.snippet, "We review & compare electrolytes.");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(first.publication_date.as_deref(), Some("2024-01-03"));
        assert_eq!(first.doi.as_deref(), Some("10.1000/abc"));
        assert_eq!(first.journal.as_deref(), Some("arXiv"));
        assert_eq!(first.domain, "arxiv.org");
    }

    #[tokio::test]
    async fn queries_the_export_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "all:electrolytes"))
            .and(query_param("max_results", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let provider = ArxivProvider::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url(format!("{}/api", server.uri()));
        let sources = provider.search("electrolytes", 3).await.unwrap();
        assert_eq!(sources.len(), 2);
    }
}
