use std::fmt::Write as _;

use serde::Serialize;

use crate::source::{Source, SourceType};

const TOP_DOMAINS: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TypeCount {
    pub source_type: SourceType,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DomainCount {
    pub domain: String,
    pub count: usize,
    pub percentage: f64,
}

/// Aggregate view over a run's sources: type mix, domains and metadata coverage.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceStatistics {
    pub total: usize,
    pub with_dates: usize,
    pub with_authors: usize,
    pub with_doi: usize,
    pub by_type: Vec<TypeCount>,
    pub top_domains: Vec<DomainCount>,
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Counts in first-seen order, then stably sorted by count descending.
fn ranked<K: PartialEq + Clone>(keys: impl Iterator<Item = K>) -> Vec<(K, usize)> {
    let mut counts: Vec<(K, usize)> = Vec::new();
    for key in keys {
        match counts.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, count)) => *count += 1,
            None => counts.push((key, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

impl SourceStatistics {
    pub fn from_sources(sources: &[Source]) -> Self {
        let total = sources.len();

        let by_type = ranked(sources.iter().map(|source| source.source_type))
            .into_iter()
            .map(|(source_type, count)| TypeCount {
                source_type,
                count,
                percentage: percentage(count, total),
            })
            .collect();

        let top_domains = ranked(sources.iter().map(|source| source.domain.clone()))
            .into_iter()
            .take(TOP_DOMAINS)
            .map(|(domain, count)| DomainCount {
                domain,
                count,
                percentage: percentage(count, total),
            })
            .collect();

        Self {
            total,
            with_dates: sources.iter().filter(|s| s.publication_date.is_some()).count(),
            with_authors: sources.iter().filter(|s| !s.authors.is_empty()).count(),
            with_doi: sources.iter().filter(|s| s.doi.is_some()).count(),
            by_type,
            top_domains,
        }
    }

    pub fn count_for(&self, source_type: SourceType) -> usize {
        self.by_type
            .iter()
            .find(|entry| entry.source_type == source_type)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn render_markdown(&self) -> String {
        if self.total == 0 {
            return "No sources available for analysis.".to_string();
        }

        let mut output = String::from("# Source Statistics\n\n## Overview\n");
        let _ = writeln!(output, "- **Total Sources**: {}", self.total);
        for (label, count) in [
            ("Sources with Publication Dates", self.with_dates),
            ("Sources with Author Information", self.with_authors),
            ("Sources with DOI", self.with_doi),
        ] {
            let _ = writeln!(
                output,
                "- **{label}**: {count} ({:.1}%)",
                percentage(count, self.total)
            );
        }

        output.push_str("\n## Source Types\n");
        for entry in &self.by_type {
            let _ = writeln!(
                output,
                "- **{}**: {} ({:.1}%)",
                entry.source_type.label(),
                entry.count,
                entry.percentage
            );
        }

        output.push_str("\n## Top Domains\n");
        for entry in &self.top_domains {
            let _ = writeln!(
                output,
                "- **{}**: {} ({:.1}%)",
                entry.domain, entry.count, entry.percentage
            );
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_rank_types_and_domains() {
        let sources = vec![
            Source::from_web("a", "https://example.com/a", "").with_date(Some("2024".into())),
            Source::paper("p", "https://arxiv.org/abs/1").with_doi(Some("10.1/x".into())),
            Source::paper("q", "https://arxiv.org/abs/2").with_authors(vec!["A".into()]),
        ];
        let stats = SourceStatistics::from_sources(&sources);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type[0].source_type, SourceType::Paper);
        assert_eq!(stats.count_for(SourceType::Web), 1);
        assert_eq!(stats.count_for(SourceType::News), 0);
        assert_eq!(stats.top_domains[0].domain, "arxiv.org");

        let markdown = stats.render_markdown();
        assert!(markdown.contains("- **Total Sources**: 3"));
        assert!(markdown.contains("- **Sources with DOI**: 1 (33.3%)"));
        assert!(markdown.contains("- **Paper**: 2 (66.7%)"));
        assert!(markdown.contains("- **example.com**: 1 (33.3%)"));
    }

    #[test]
    fn empty_input_has_message() {
        let stats = SourceStatistics::from_sources(&[]);
        assert_eq!(stats.render_markdown(), "No sources available for analysis.");
    }
}
