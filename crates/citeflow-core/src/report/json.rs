use std::collections::BTreeMap;

use serde::Serialize;

use super::stats::SourceStatistics;
use crate::source::{Source, group_by_type};
use crate::{CiteflowError, ResearchOutcome, Result};

#[derive(Serialize)]
struct JsonReport<'a> {
    query: &'a str,
    generated_at: String,
    content: &'a str,
    word_count: usize,
    citation_count: usize,
    citations: &'a BTreeMap<usize, usize>,
    statistics: SourceStatistics,
    sources: &'a [Source],
}

pub fn render(outcome: &ResearchOutcome) -> Result<String> {
    let result = &outcome.result;
    let report = JsonReport {
        query: &outcome.query,
        generated_at: outcome.generated_at.to_rfc3339(),
        content: &result.content,
        word_count: result.word_count(),
        citation_count: result.citation_count(),
        citations: &result.citations,
        statistics: result.statistics(),
        sources: &result.sources,
    };
    serde_json::to_string_pretty(&report).map_err(|err| CiteflowError::Render(err.to_string()))
}

#[derive(Serialize)]
struct SourceInfo<'a> {
    total_sources: usize,
    source_types: BTreeMap<&'static str, usize>,
    sources_by_type: BTreeMap<&'static str, Vec<&'a Source>>,
    all_sources: &'a [Source],
}

/// Source inventory: counts per type, sources grouped by type, and the full list.
pub fn source_info(sources: &[Source]) -> Result<String> {
    let groups = group_by_type(sources);
    let info = SourceInfo {
        total_sources: sources.len(),
        source_types: groups
            .iter()
            .map(|(kind, members)| (kind.as_str(), members.len()))
            .collect(),
        sources_by_type: groups
            .into_iter()
            .map(|(kind, members)| (kind.as_str(), members))
            .collect(),
        all_sources: sources,
    };
    serde_json::to_string_pretty(&info).map_err(|err| CiteflowError::Render(err.to_string()))
}
