//! Source records and the bookkeeping applied to them after retrieval:
//! classification, domain extraction, deduplication and grouping.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const ACADEMIC_INDICATORS: &[&str] = &[
    "arxiv.org",
    "pubmed.ncbi.nlm.nih.gov",
    "scholar.google.com",
    "researchgate.net",
    "ieee.org",
    "acm.org",
    "springer.com",
    "sciencedirect.com",
    "nature.com",
    "science.org",
    "cell.com",
    "plos.org",
    "biorxiv.org",
    "medrxiv.org",
    ".edu/",
    "jstor.org",
    "doi.org",
];

const NEWS_INDICATORS: &[&str] = &[
    "reuters.com",
    "bbc.com",
    "cnn.com",
    "nytimes.com",
    "wsj.com",
    "theguardian.com",
    "washingtonpost.com",
    "bloomberg.com",
    "forbes.com",
    "techcrunch.com",
    "wired.com",
    "news.",
];

const TECHNICAL_INDICATORS: &[&str] = &[
    "github.com",
    "stackoverflow.com",
    "medium.com",
    "dev.to",
    "hackernews.com",
    "arstechnica.com",
];

const ACADEMIC_TITLE_KEYWORDS: &[&str] = &["research", "study", "paper", "journal", "analysis", "review"];

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s\)\]>'\x22]+").expect("invalid url regex"));

/// Kind of reference a [`Source`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Web,
    Paper,
    Article,
    News,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Web => "web",
            SourceType::Paper => "paper",
            SourceType::Article => "article",
            SourceType::News => "news",
        }
    }

    /// Heading label, e.g. "Paper" in "Paper Sources (3)".
    pub fn label(self) -> &'static str {
        match self {
            SourceType::Web => "Web",
            SourceType::Paper => "Paper",
            SourceType::Article => "Article",
            SourceType::News => "News",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single retrieved reference with provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub domain: String,
    pub snippet: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
}

impl Source {
    /// Build a web hit, deriving domain and type from the URL and title.
    pub fn from_web(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        let title = title.into();
        let url = url.into();
        let domain = extract_domain(&url);
        let source_type = classify_source(&url, &title);
        let title = if title.trim().is_empty() {
            format!("Source from {domain}")
        } else {
            title
        };

        Self {
            title,
            url,
            domain,
            snippet: snippet.into(),
            source_type,
            publication_date: None,
            authors: Vec::new(),
            doi: None,
            journal: None,
        }
    }

    /// Build a record returned by an academic metadata API.
    pub fn paper(title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            domain: extract_domain(&url),
            url,
            snippet: String::new(),
            source_type: SourceType::Paper,
            publication_date: None,
            authors: Vec::new(),
            doi: None,
            journal: None,
        }
    }

    pub fn with_date(mut self, date: Option<String>) -> Self {
        self.publication_date = date.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors
            .into_iter()
            .map(|author| author.trim().to_string())
            .filter(|author| !author.is_empty())
            .collect();
        self
    }

    pub fn with_doi(mut self, doi: Option<String>) -> Self {
        self.doi = doi
            .map(|value| normalize_doi(&value))
            .filter(|value| !value.is_empty());
        self
    }

    pub fn with_journal(mut self, journal: Option<String>) -> Self {
        self.journal = journal.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Key used to decide whether two records point at the same document.
    pub fn dedup_key(&self) -> String {
        normalize_url(&self.url)
    }

    fn absorb(&mut self, other: Source) {
        if self.publication_date.is_none() {
            self.publication_date = other.publication_date;
        }
        if self.authors.is_empty() {
            self.authors = other.authors;
        }
        if self.doi.is_none() {
            self.doi = other.doi;
        }
        if self.journal.is_none() {
            self.journal = other.journal;
        }
        if self.snippet.trim().is_empty() {
            self.snippet = other.snippet;
        }
        if self.source_type == SourceType::Web && other.source_type != SourceType::Web {
            self.source_type = other.source_type;
        }
    }
}

/// Host portion of a URL; falls back to the third `/` segment for unparseable input.
pub fn extract_domain(url: &str) -> String {
    if let Some(host) = Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .filter(|host| !host.is_empty())
    {
        return host;
    }

    url.split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty())
        .unwrap_or(url)
        .to_string()
}

/// Classify a source from its URL and title.
pub fn classify_source(url: &str, title: &str) -> SourceType {
    let url_lower = url.to_lowercase();
    let title_lower = title.to_lowercase();

    if ACADEMIC_INDICATORS.iter().any(|needle| url_lower.contains(needle)) {
        return SourceType::Paper;
    }
    if NEWS_INDICATORS.iter().any(|needle| url_lower.contains(needle)) {
        return SourceType::News;
    }
    if TECHNICAL_INDICATORS.iter().any(|needle| url_lower.contains(needle)) {
        return SourceType::Article;
    }
    if ACADEMIC_TITLE_KEYWORDS
        .iter()
        .any(|keyword| title_lower.contains(keyword))
    {
        return SourceType::Paper;
    }
    SourceType::Web
}

/// Canonical form of a URL for duplicate detection.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let host = parsed
                .host_str()
                .map(|host| host.trim_start_matches("www.").to_ascii_lowercase())
                .unwrap_or_default();
            let path = parsed.path().trim_end_matches('/').to_string();
            let query = parsed
                .query()
                .map(|query| format!("?{query}"))
                .unwrap_or_default();
            format!("{host}{path}{query}")
        }
        Err(_) => trimmed.trim_end_matches('/').to_ascii_lowercase(),
    }
}

fn normalize_doi(doi: &str) -> String {
    let lowered = doi.trim().to_ascii_lowercase();
    lowered
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("http://doi.org/")
        .trim_start_matches("doi:")
        .trim()
        .to_string()
}

/// Collapse duplicates (same normalized URL or same DOI), keeping first-seen order.
///
/// A merge can hand an entry a DOI that an earlier survivor already carries,
/// so passes repeat until one merges nothing. The result is a fixed point:
/// deduplicating it again returns it unchanged.
pub fn dedup_sources(sources: Vec<Source>) -> Vec<Source> {
    let mut current = sources;
    loop {
        let before = current.len();
        current = dedup_pass(current);
        if current.len() == before {
            return current;
        }
    }
}

fn dedup_pass(sources: Vec<Source>) -> Vec<Source> {
    let mut unique: Vec<Source> = Vec::with_capacity(sources.len());
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut by_doi: HashMap<String, usize> = HashMap::new();

    for source in sources {
        let url_key = source.dedup_key();
        let doi_key = source.doi.as_deref().map(normalize_doi);

        let existing = by_url
            .get(&url_key)
            .copied()
            .or_else(|| doi_key.as_ref().and_then(|doi| by_doi.get(doi).copied()));

        match existing {
            Some(index) => {
                unique[index].absorb(source);
                if let Some(doi) = unique[index].doi.as_deref().map(normalize_doi) {
                    by_doi.entry(doi).or_insert(index);
                }
                by_url.entry(url_key).or_insert(index);
            }
            None => {
                let index = unique.len();
                by_url.insert(url_key, index);
                if let Some(doi) = doi_key {
                    by_doi.insert(doi, index);
                }
                unique.push(source);
            }
        }
    }

    unique
}

/// Group sources by type, preserving the order in which each type first appears.
pub fn group_by_type(sources: &[Source]) -> Vec<(SourceType, Vec<&Source>)> {
    let mut groups: Vec<(SourceType, Vec<&Source>)> = Vec::new();
    for source in sources {
        match groups.iter_mut().find(|(kind, _)| *kind == source.source_type) {
            Some((_, members)) => members.push(source),
            None => groups.push((source.source_type, vec![source])),
        }
    }
    groups
}

/// Fallback extraction of bare URLs from free text (at most `limit`).
pub fn sources_from_text(text: &str, limit: usize) -> Vec<Source> {
    URL_PATTERN
        .find_iter(text)
        .map(|found| found.as_str().trim_end_matches(['.', ',', ';']))
        .take(limit)
        .map(|url| Source::from_web("", url, ""))
        .collect()
}
