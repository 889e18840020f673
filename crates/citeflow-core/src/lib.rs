//! Citeflow core: configuration, external service clients, the research task
//! graph built on `graph_flow`, and the report renderers.
//!
//! A run plans a set of focused web searches, executes them through LinkUp,
//! enriches the result with academic metadata lookups, and asks the
//! configured LLM for a report that cites the collected sources as `[n]`.

pub mod academic;
pub mod config;
mod error;
pub mod llm;
pub mod metrics;
mod prompts;
pub mod report;
mod result;
mod retry;
pub mod search;
mod security;
pub mod source;
mod tasks;
pub mod telemetry;
mod trace;
mod workflow;

pub use academic::{AcademicProvider, AcademicResults, AcademicSearch, ProviderFailure};
pub use config::{Config, ConfigLoader, LlmProvider};
pub use error::{CiteflowError, FailureKind, Result, TaskFailure};
pub use llm::{LanguageModel, build_language_model};
pub use report::citations::CitationStyle;
pub use report::stats::SourceStatistics;
pub use report::{ReportFormat, ReportOptions, default_file_name, render};
pub use result::{ResearchOutcome, ResearchResult};
pub use retry::RetryPolicy;
pub use search::{
    LinkupClient, SearchBudget, SearchDepth, SearchFocus, SearchHit, SearchTool, SearchToolSettings, WebSearch,
};
pub use security::{SecretValue, env_is_set, redact, require_env};
pub use source::{Source, SourceType};
pub use tasks::{PlannedSearch, default_plan, parse_plan};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceEvent, TraceStep, TraceSummary};
pub use workflow::{ResearchOptions, ResearchToolkit, SourceCollection, collect_sources, run_research};
