use std::fmt::Write as _;

use super::ReportOptions;
use super::citations::{format_references, strip_markdown};
use crate::ResearchOutcome;

/// Plain text: Markdown removed, followed by a numbered source list.
pub fn render(outcome: &ResearchOutcome, options: &ReportOptions) -> String {
    let result = &outcome.result;
    let mut output = strip_markdown(&result.content).trim().to_string();

    if result.sources.is_empty() {
        output.push('\n');
        return output;
    }

    output.push_str("\n\nSources\n-------\n");
    match options.citation_style {
        Some(style) => {
            output.push_str(&strip_markdown(&format_references(&result.sources, style)));
            output.push('\n');
        }
        None => {
            for (idx, source) in result.sources.iter().enumerate() {
                let _ = writeln!(output, "[{}] {}", idx + 1, source.title);
                let _ = writeln!(output, "    {}", source.url);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::citations::CitationStyle;
    use crate::report::fixtures;

    #[test]
    fn markdown_is_removed_and_sources_listed() {
        let text = render(&fixtures::outcome(), &ReportOptions::default());
        assert!(text.starts_with("Sodium-ion Batteries"));
        assert!(!text.contains('#'));
        assert!(!text.contains("**"));
        assert!(text.contains("See the docs for more."));
        assert!(text.contains("[2] Sodium-ion cathodes\n    https://arxiv.org/abs/2401.00001"));
    }

    #[test]
    fn citation_style_replaces_plain_list() {
        let options = ReportOptions {
            citation_style: Some(CitationStyle::Apa),
            ..ReportOptions::default()
        };
        let text = render(&fixtures::outcome(), &options);
        assert!(text.contains("[2] Ada Lovelace Sodium-ion cathodes. arXiv. https://doi.org/10.48550/arxiv.2401.00001"));
    }
}
