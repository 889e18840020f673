//! Output renderers for a completed research run.

pub mod citations;
pub mod json;
pub mod markdown;
pub mod pdf;
pub mod stats;
pub mod text;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CiteflowError, ResearchOutcome, Result};
use citations::CitationStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    #[default]
    Markdown,
    Json,
    Pdf,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 4] = [
        ReportFormat::Text,
        ReportFormat::Markdown,
        ReportFormat::Json,
        ReportFormat::Pdf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportFormat::Text => "text",
            ReportFormat::Markdown => "markdown",
            ReportFormat::Json => "json",
            ReportFormat::Pdf => "pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
            ReportFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ReportFormat::Text => "text/plain; charset=utf-8",
            ReportFormat::Markdown => "text/markdown; charset=utf-8",
            ReportFormat::Json => "application/json",
            ReportFormat::Pdf => "application/pdf",
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, ReportFormat::Pdf)
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = CiteflowError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            "pdf" => Ok(ReportFormat::Pdf),
            other => Err(CiteflowError::InvalidConfiguration(format!(
                "unknown format `{other}` (expected text, markdown, json or pdf)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    /// Append a reference list in this style.
    pub citation_style: Option<CitationStyle>,
    /// Append the grouped source summary (Markdown only).
    pub source_summary: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            citation_style: None,
            source_summary: true,
        }
    }
}

/// Render `outcome` in `format`. Text formats are UTF-8.
pub fn render(outcome: &ResearchOutcome, format: ReportFormat, options: &ReportOptions) -> Result<Vec<u8>> {
    match format {
        ReportFormat::Text => Ok(text::render(outcome, options).into_bytes()),
        ReportFormat::Markdown => Ok(markdown::render(outcome, options).into_bytes()),
        ReportFormat::Json => json::render(outcome).map(String::into_bytes),
        ReportFormat::Pdf => pdf::render(outcome, options),
    }
}

/// `research_report_<timestamp>.<ext>`
pub fn default_file_name(format: ReportFormat, generated_at: DateTime<Utc>) -> String {
    format!(
        "research_report_{}.{}",
        generated_at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}
