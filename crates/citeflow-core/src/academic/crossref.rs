use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{AcademicProvider, check_status, clean_markup, http_client};
use crate::search::snippet_of;
use crate::source::Source;
use crate::{CiteflowError, Result};

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// CrossRef works search.
pub struct CrossrefProvider {
    http: reqwest::Client,
    base_url: String,
    mailto: Option<String>,
}

#[derive(Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Deserialize)]
struct Work {
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    author: Vec<Author>,
    #[serde(default, rename = "container-title")]
    container_title: Vec<String>,
    #[serde(rename = "published-print")]
    published_print: Option<DateParts>,
    #[serde(rename = "published-online")]
    published_online: Option<DateParts>,
    issued: Option<DateParts>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Deserialize)]
struct Author {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

impl Author {
    fn display(&self) -> Option<String> {
        match (&self.given, &self.family, &self.name) {
            (Some(given), Some(family), _) => Some(format!("{given} {family}")),
            (None, Some(family), _) => Some(family.clone()),
            (_, None, Some(name)) => Some(name.clone()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct DateParts {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

impl DateParts {
    fn render(&self) -> Option<String> {
        let parts: Vec<i64> = self.date_parts.first()?.iter().map_while(|part| *part).collect();
        match parts.as_slice() {
            [year, month, day, ..] => Some(format!("{year:04}-{month:02}-{day:02}")),
            [year, month] => Some(format!("{year:04}-{month:02}")),
            [year] => Some(format!("{year:04}")),
            [] => None,
        }
    }
}

impl CrossrefProvider {
    pub fn new(timeout: Duration, mailto: Option<String>) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            mailto,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

fn into_source(work: Work) -> Option<Source> {
    let title = clean_markup(work.title.first()?);
    if title.is_empty() {
        return None;
    }
    let url = work
        .url
        .clone()
        .or_else(|| work.doi.as_ref().map(|doi| format!("https://doi.org/{doi}")))?;
    let date = [&work.published_print, &work.published_online, &work.issued]
        .into_iter()
        .flatten()
        .find_map(DateParts::render);
    let snippet = work
        .abstract_text
        .as_deref()
        .map(|text| snippet_of(&clean_markup(text), 400))
        .unwrap_or_default();

    Some(
        Source::paper(title, url)
            .with_snippet(snippet)
            .with_authors(work.author.iter().filter_map(Author::display).collect())
            .with_date(date)
            .with_doi(work.doi)
            .with_journal(work.container_title.into_iter().next()),
    )
}

#[async_trait]
impl AcademicProvider for CrossrefProvider {
    fn id(&self) -> &'static str {
        "crossref"
    }

    #[instrument(name = "academic.crossref", skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Source>> {
        let mut params = vec![
            ("query", query.to_string()),
            ("rows", max_results.to_string()),
        ];
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }

        let response = self
            .http
            .get(format!("{}/works", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|err| CiteflowError::transport("crossref", err))?;

        let payload: WorksResponse = check_status("crossref", response)
            .await?
            .json()
            .await
            .map_err(|err| CiteflowError::transport("crossref", err))?;

        let sources: Vec<Source> = payload.message.items.into_iter().filter_map(into_source).collect();
        debug!(hits = sources.len(), "crossref works parsed");
        Ok(sources)
    }
}
