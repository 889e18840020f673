//! Markdown report plus the source listings shared with the MCP server.

use std::fmt::Write as _;

use super::ReportOptions;
use super::citations::append_references;
use crate::source::{Source, group_by_type};
use crate::ResearchOutcome;

const SUMMARY_PER_TYPE: usize = 10;

pub fn render(outcome: &ResearchOutcome, options: &ReportOptions) -> String {
    let result = &outcome.result;
    let mut output = match options.citation_style {
        Some(style) => append_references(result.content.trim_end(), &result.sources, style),
        None => result.content.trim_end().to_string(),
    };
    if options.source_summary {
        output.push_str(&source_summary(&result.sources));
    }
    if !output.ends_with('\n') {
        output.push('\n');
    }
    output
}

/// `## Source Summary` section grouped by type, at most ten entries per type.
pub fn source_summary(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut output = String::from("\n\n---\n\n## Source Summary\n");
    for (source_type, members) in group_by_type(sources) {
        let _ = write!(output, "\n### {} Sources ({})\n\n", source_type.label(), members.len());
        for (idx, source) in members.iter().take(SUMMARY_PER_TYPE).enumerate() {
            let _ = writeln!(output, "{}. **{}**", idx + 1, source.title);
            let _ = writeln!(output, "   - URL: {}", source.url);
            let _ = writeln!(output, "   - Domain: {}", source.domain);
            if let Some(date) = &source.publication_date {
                let _ = writeln!(output, "   - Date: {date}");
            }
            output.push('\n');
        }
    }
    output
}

fn shortened(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Full metadata for every source, grouped by type.
pub fn detailed_source_info(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut output = String::from("\n\n---\n\n## Detailed Source Information\n");
    for (source_type, members) in group_by_type(sources) {
        let _ = write!(output, "\n### {} Sources ({})\n\n", source_type.label(), members.len());
        for (idx, source) in members.iter().enumerate() {
            let _ = writeln!(output, "**{}. {}**", idx + 1, source.title);
            let _ = writeln!(output, "- **URL**: {}", source.url);
            let _ = writeln!(output, "- **Domain**: {}", source.domain);
            let _ = writeln!(output, "- **Type**: {}", source.source_type);
            if !source.snippet.is_empty() {
                let _ = writeln!(output, "- **Snippet**: {}", shortened(&source.snippet, 150));
            }
            if let Some(date) = &source.publication_date {
                let _ = writeln!(output, "- **Date**: {date}");
            }
            if !source.authors.is_empty() {
                let _ = writeln!(output, "- **Authors**: {}", source.authors.join(", "));
            }
            if let Some(journal) = &source.journal {
                let _ = writeln!(output, "- **Journal**: {journal}");
            }
            if let Some(doi) = &source.doi {
                let _ = writeln!(output, "- **DOI**: {doi}");
            }
            output.push('\n');
        }
    }
    output
}

/// Listing used for academic-only lookups.
pub fn paper_listing(query: &str, papers: &[Source]) -> String {
    if papers.is_empty() {
        return format!("No academic papers found for \"{query}\".");
    }

    let mut output = format!("## Academic Sources Found\n\nQuery: {query}\n\n");
    for (idx, paper) in papers.iter().enumerate() {
        let _ = writeln!(output, "**{}. {}**", idx + 1, paper.title);
        let _ = writeln!(output, "- **URL**: {}", paper.url);
        let _ = writeln!(output, "- **Domain**: {}", paper.domain);
        if !paper.authors.is_empty() {
            let _ = writeln!(output, "- **Authors**: {}", paper.authors.join(", "));
        }
        if let Some(journal) = &paper.journal {
            let _ = writeln!(output, "- **Journal**: {journal}");
        }
        if let Some(doi) = &paper.doi {
            let _ = writeln!(output, "- **DOI**: {doi}");
        }
        if let Some(date) = &paper.publication_date {
            let _ = writeln!(output, "- **Publication Date**: {date}");
        }
        if !paper.snippet.is_empty() {
            let _ = writeln!(output, "- **Abstract/Snippet**: {}", shortened(&paper.snippet, 200));
        }
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::citations::CitationStyle;
    use crate::report::fixtures;

    #[test]
    fn summary_groups_by_type() {
        let markdown = render(&fixtures::outcome(), &ReportOptions::default());
        assert!(markdown.contains("## Source Summary"));
        assert!(markdown.contains("### Web Sources (1)"));
        assert!(markdown.contains("### Paper Sources (1)"));
        assert!(markdown.contains("### News Sources (1)"));
        assert!(markdown.contains("   - Domain: www.reuters.com"));
        assert!(markdown.contains("   - Date: 2024-05-01"));
    }

    #[test]
    fn summary_caps_entries_per_type() {
        let sources: Vec<Source> = (0..12)
            .map(|n| Source::from_web(format!("Page {n}"), format!("https://site{n}.example.com"), ""))
            .collect();
        let summary = source_summary(&sources);
        assert!(summary.contains("### Web Sources (12)"));
        assert!(summary.contains("10. **Page 9**"));
        assert!(!summary.contains("Page 10"));
    }

    #[test]
    fn references_precede_summary() {
        let options = ReportOptions {
            citation_style: Some(CitationStyle::Mla),
            source_summary: true,
        };
        let markdown = render(&fixtures::outcome(), &options);
        let references = markdown.find("## References").unwrap();
        let summary = markdown.find("## Source Summary").unwrap();
        assert!(references < summary);
    }

    #[test]
    fn detailed_info_includes_metadata() {
        let outcome = fixtures::outcome();
        let details = detailed_source_info(&outcome.result.sources);
        assert!(details.contains("- **Authors**: Ada Lovelace"));
        assert!(details.contains("- **DOI**: 10.48550/arxiv.2401.00001"));
        assert!(details.contains("- **Snippet**: Grid snippet..."));
    }

    #[test]
    fn empty_paper_listing_mentions_query() {
        assert_eq!(paper_listing("dark matter", &[]), "No academic papers found for \"dark matter\".");
    }
}
