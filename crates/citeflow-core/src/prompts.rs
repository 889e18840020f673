use std::fmt::Write as _;

use crate::source::Source;

pub const PLANNER_SYSTEM: &str = "You are an advanced research specialist. You plan web searches that together \
cover a topic from several angles: general background, academic research, recent news, technical documentation, \
statistics, expert opinion, case studies and industry perspectives.";

pub fn planner_prompt(query: &str, max_searches: usize) -> String {
    format!(
        "Plan up to {max_searches} web searches for researching: {query}\n\n\
         Return one search per line in the form `focus | search query`, where focus is one of \
         general, academic, news or technical. Use targeted queries for each focus area and \
         prioritize authoritative sources (peer-reviewed papers, institutional reports, \
         reputable news, official documentation). Return only the lines, no commentary."
    )
}

pub const WRITER_SYSTEM: &str = "You are a research writer with citation expertise. You write well-structured \
reports, cite every claim with numbered in-text citations, and never invent sources that are not in the provided list.";

pub fn writer_prompt(query: &str, findings: &[String], sources: &[Source], failed_searches: usize) -> String {
    let mut prompt = format!("Create a comprehensive research report about: {query}\n\n");

    prompt.push_str(
        "Requirements:\n\
         - Target length: 2000-2500 words\n\
         - Include proper citations and source links throughout\n\
         - Structure with clear sections and subsections using Markdown headings\n\
         - End with the conclusion; the source list is appended to every export, so do not write a References section\n\n\
         Report Structure:\n\
         1. Executive Summary (200-250 words)\n\
         2. Introduction and Background (400-500 words)\n\
         3. Literature Review (if academic sources available) (300-400 words)\n\
         4. Key Findings and Analysis (600-800 words)\n\
         5. Recent Developments and News (300-400 words)\n\
         6. Technical Considerations (if applicable) (200-300 words)\n\
         7. Conclusion and Future Implications (200-300 words)\n\n\
         Citation Guidelines:\n\
         - Use in-text citations like [1], [2] that refer to the numbered source list below\n\
         - Only cite numbers that appear in the source list\n\
         - Include DOIs for academic papers when available\n\
         - Prioritize recent and authoritative sources\n\n\
         Content Guidelines:\n\
         - Synthesize information from multiple sources\n\
         - Highlight conflicting viewpoints when present\n\
         - Include specific data, statistics and examples\n\
         - Maintain an academic tone while staying accessible\n\n",
    );

    prompt.push_str("Numbered sources:\n");
    if sources.is_empty() {
        prompt.push_str("(none)\n");
    }
    for (idx, source) in sources.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", idx + 1, source.title);
        let _ = writeln!(prompt, "    URL: {}", source.url);
        let mut meta = vec![format!("Type: {}", source.source_type)];
        if let Some(date) = &source.publication_date {
            meta.push(format!("Date: {date}"));
        }
        if !source.authors.is_empty() {
            meta.push(format!("Authors: {}", source.authors.join(", ")));
        }
        if let Some(journal) = &source.journal {
            meta.push(format!("Journal: {journal}"));
        }
        if let Some(doi) = &source.doi {
            meta.push(format!("DOI: {doi}"));
        }
        let _ = writeln!(prompt, "    {}", meta.join(" | "));
        if !source.snippet.trim().is_empty() {
            let _ = writeln!(prompt, "    Snippet: {}", source.snippet.trim());
        }
    }

    prompt.push_str("\nResearch findings:\n\n");
    if findings.is_empty() {
        prompt.push_str("(no web search findings; rely on the academic sources above)\n");
    } else {
        prompt.push_str(&findings.join("\n\n---\n\n"));
        prompt.push('\n');
    }
    if failed_searches > 0 {
        let _ = writeln!(
            prompt,
            "\nNote: {failed_searches} planned search(es) failed; do not speculate about their topics."
        );
    }
    prompt
}
