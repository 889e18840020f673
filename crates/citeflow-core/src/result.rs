use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::citations::{count_citations, word_count};
use crate::report::stats::SourceStatistics;
use crate::source::{Source, dedup_sources};
use crate::trace::{TraceEvent, TraceSummary};

/// Report text plus the sources it cites.
///
/// `citations` maps the 1-based index of a source in `sources` to the number
/// of times the report cites it. Sources that are never cited have no entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchResult {
    pub content: String,
    pub sources: Vec<Source>,
    pub citations: BTreeMap<usize, usize>,
}

impl ResearchResult {
    /// Deduplicate `sources` and count the citation markers in `content`.
    pub fn new(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self::from_deduped(content, dedup_sources(sources))
    }

    /// Count citations against `sources` exactly as given. The list must be the
    /// one the report was numbered against, so no further merging happens here.
    pub fn from_deduped(content: impl Into<String>, sources: Vec<Source>) -> Self {
        let content = content.into();
        let citations = count_citations(&content, sources.len());
        Self {
            content,
            sources,
            citations,
        }
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.content)
    }

    pub fn citation_count(&self) -> usize {
        self.citations.len()
    }

    pub fn statistics(&self) -> SourceStatistics {
        SourceStatistics::from_sources(&self.sources)
    }

    /// Sources referenced at least once, with their citation index.
    pub fn cited_sources(&self) -> impl Iterator<Item = (usize, &Source)> {
        self.citations
            .keys()
            .filter_map(|index| self.sources.get(index - 1).map(|source| (*index, source)))
    }
}

/// One completed research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub session_id: String,
    pub query: String,
    pub result: ResearchResult,
    pub generated_at: DateTime<Utc>,
    pub searches_performed: usize,
    #[serde(default)]
    pub trace_events: Vec<TraceEvent>,
}

impl ResearchOutcome {
    pub fn trace_summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_dedups_and_counts() {
        let result = ResearchResult::new(
            "Intro [1]. Detail [2][2]. Stray [7].",
            vec![
                Source::from_web("A", "https://a.example/x", ""),
                Source::from_web("A again", "https://www.a.example/x/", ""),
                Source::from_web("B", "https://b.example/y", ""),
            ],
        );

        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.citations.get(&1), Some(&1));
        assert_eq!(result.citations.get(&2), Some(&2));
        assert_eq!(result.citation_count(), 2);

        let cited: Vec<_> = result.cited_sources().map(|(idx, s)| (idx, s.title.clone())).collect();
        assert_eq!(cited, vec![(1, "A".to_string()), (2, "B".to_string())]);
    }

    #[test]
    fn numbering_survives_a_second_merge_pass() {
        let numbered = dedup_sources(vec![
            Source::from_web("Preprint", "https://arxiv.org/abs/1", ""),
            Source::paper("Published", "https://doi.org/10.1/x").with_doi(Some("10.1/x".into())),
            Source::paper("Preprint", "https://arxiv.org/abs/1").with_doi(Some("10.1/x".into())),
            Source::from_web("Other", "https://other.example/y", ""),
        ]);
        let other = numbered
            .iter()
            .position(|source| source.url == "https://other.example/y")
            .map(|idx| idx + 1)
            .unwrap();
        let content = format!("Other is [{other}].");

        let finalized = ResearchResult::from_deduped(content.clone(), numbered.clone());
        assert_eq!(finalized.sources, numbered);
        assert_eq!(finalized.citations.get(&other), Some(&1));
        assert_eq!(ResearchResult::new(content, numbered).citations, finalized.citations);
    }

    #[test]
    fn citation_keys_serialize_as_strings() {
        let result = ResearchResult::new("See [1].", vec![Source::from_web("A", "https://a.example", "")]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["citations"]["1"], 1);
    }
}
