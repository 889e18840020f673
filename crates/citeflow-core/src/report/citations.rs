//! In-text citation markers, reference lists and text metrics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::source::Source;
use crate::CiteflowError;

/// Widest `[a-b]` range expanded when counting citations.
const MAX_RANGE_SPAN: usize = 100;

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+(?:\s*[-–,]\s*\d+)*)\]").expect("invalid citation regex"));
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("invalid link regex"));
static MARKDOWN_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*#`]").expect("invalid markup regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Apa,
    Mla,
    Simple,
}

impl CitationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            CitationStyle::Apa => "apa",
            CitationStyle::Mla => "mla",
            CitationStyle::Simple => "simple",
        }
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationStyle {
    type Err = CiteflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apa" => Ok(CitationStyle::Apa),
            "mla" => Ok(CitationStyle::Mla),
            "simple" => Ok(CitationStyle::Simple),
            other => Err(CiteflowError::InvalidConfiguration(format!(
                "unknown citation style `{other}` (expected apa, mla or simple)"
            ))),
        }
    }
}

/// One numbered reference entry.
pub fn format_reference(index: usize, source: &Source, style: CitationStyle) -> String {
    let mut citation = format!("[{index}] ");
    match style {
        CitationStyle::Apa => {
            if !source.authors.is_empty() {
                citation.push_str(&source.authors.join(", "));
                citation.push(' ');
            }
            if let Some(date) = &source.publication_date {
                citation.push_str(&format!("({date}). "));
            }
            citation.push_str(&format!("*{}*. ", source.title));
            if let Some(journal) = &source.journal {
                citation.push_str(&format!("{journal}. "));
            }
            match &source.doi {
                Some(doi) => citation.push_str(&format!("https://doi.org/{doi}")),
                None => citation.push_str(&source.url),
            }
        }
        CitationStyle::Mla => {
            if let Some(first) = source.authors.first() {
                citation.push_str(&format!("{first}. "));
            }
            citation.push_str(&format!("\"{}.\" ", source.title));
            if let Some(journal) = &source.journal {
                citation.push_str(&format!("*{journal}*, "));
            }
            if let Some(date) = &source.publication_date {
                citation.push_str(&format!("{date}. "));
            }
            citation.push_str(&format!("Web. {}", source.url));
        }
        CitationStyle::Simple => {
            citation.push_str(&format!("{}. {}", source.title, source.url));
            if let Some(date) = &source.publication_date {
                citation.push_str(&format!(" (Accessed: {date})"));
            }
        }
    }
    citation
}

/// Numbered reference list, one blank line between entries.
pub fn format_references(sources: &[Source], style: CitationStyle) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(idx, source)| format_reference(idx + 1, source, style))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Append a `## References` section to `content`.
pub fn append_references(content: &str, sources: &[Source], style: CitationStyle) -> String {
    if sources.is_empty() {
        return format!("{content}\n\n*No sources available for citation formatting.*");
    }
    format!(
        "{content}\n\n---\n\n## References\n\n{}\n",
        format_references(sources, style)
    )
}

/// Every index referenced by a marker, in reading order, grouped and ranged
/// markers expanded.
pub fn cited_indices(content: &str) -> Vec<usize> {
    let mut indices = Vec::new();
    for caps in MARKER.captures_iter(content) {
        for part in caps[1].split(',') {
            let part = part.trim();
            let bounds: Vec<&str> = part.split(['-', '–']).map(str::trim).collect();
            match bounds.as_slice() {
                [single] => {
                    if let Ok(index) = single.parse() {
                        indices.push(index);
                    }
                }
                [start, end] => {
                    if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                        if start <= end && end - start <= MAX_RANGE_SPAN {
                            indices.extend(start..=end);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    indices
}

/// Usage count per cited source index; markers outside `1..=source_count` are dropped.
pub fn count_citations(content: &str, source_count: usize) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for index in cited_indices(content) {
        if (1..=source_count).contains(&index) {
            *counts.entry(index).or_insert(0) += 1;
        }
    }
    counts
}

/// Drop Markdown emphasis, heading and code markers; links keep their label.
pub fn strip_markdown(content: &str) -> String {
    let unlinked = MARKDOWN_LINK.replace_all(content, "$1");
    MARKDOWN_CHARS.replace_all(&unlinked, "").into_owned()
}

pub fn word_count(content: &str) -> usize {
    strip_markdown(content)
        .replace(['[', ']'], " ")
        .split_whitespace()
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source::paper("Sodium batteries", "https://example.org/paper")
            .with_authors(vec!["Grace Hopper".into(), "Alan Turing".into()])
            .with_date(Some("2021".into()))
            .with_journal(Some("Energy Letters".into()))
    }

    #[test]
    fn apa_prefers_doi_link() {
        let with_doi = source().with_doi(Some("10.1/abc".into()));
        assert_eq!(
            format_reference(1, &with_doi, CitationStyle::Apa),
            "[1] Grace Hopper, Alan Turing (2021). *Sodium batteries*. Energy Letters. https://doi.org/10.1/abc"
        );
        assert!(format_reference(2, &source(), CitationStyle::Apa).ends_with("https://example.org/paper"));
    }

    #[test]
    fn mla_and_simple_shapes() {
        assert_eq!(
            format_reference(3, &source(), CitationStyle::Mla),
            "[3] Grace Hopper. \"Sodium batteries.\" *Energy Letters*, 2021. Web. https://example.org/paper"
        );
        assert_eq!(
            format_reference(1, &Source::from_web("Blog", "https://blog.example.com", ""), CitationStyle::Simple),
            "[1] Blog. https://blog.example.com"
        );
    }

    #[test]
    fn grouped_and_ranged_markers_are_counted() {
        let text = "Claim [1]. Another [1, 3]. Range [2-4]. Out of range [9]. Link [label](https://x.y).";
        let counts = count_citations(text, 4);
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&2), Some(&1));
        assert_eq!(counts.get(&3), Some(&2));
        assert_eq!(counts.get(&4), Some(&1));
        assert!(!counts.contains_key(&9));
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn reversed_or_huge_ranges_are_ignored() {
        assert!(cited_indices("[5-2] [1-100000]").is_empty());
    }

    #[test]
    fn markdown_is_stripped_for_plain_text() {
        assert_eq!(
            strip_markdown("## Title\n**Bold** and `code` see [docs](https://docs.rs)"),
            " Title\nBold and code see docs"
        );
        assert_eq!(word_count("# Heading\nOne [two](http://x) [3]"), 4);
    }

    #[test]
    fn references_section_is_appended() {
        let output = append_references("Body", &[source()], CitationStyle::Simple);
        assert!(output.starts_with("Body\n\n---\n\n## References\n\n[1] Sodium batteries."));
        assert!(append_references("Body", &[], CitationStyle::Apa).contains("No sources available"));
    }
}
