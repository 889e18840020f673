use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use citeflow_core::report::{json, markdown};
use citeflow_core::{
    AcademicSearch, CitationStyle, CiteflowError, Config, ConfigLoader, ReportFormat, ReportOptions, ResearchOptions,
    ResearchOutcome, ResearchToolkit, RetryPolicy, SearchFocus, SourceStatistics, TelemetryOptions, collect_sources,
    default_file_name, init_telemetry, metrics, render, run_research,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "citeflow",
    version,
    about = "Cited research reports from web search, academic APIs and an LLM"
)]
struct Cli {
    /// Path to a citeflow.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a question and write a cited report.
    Research(ResearchArgs),
    /// Look up academic papers only (no web search, no LLM).
    Papers(PapersArgs),
    /// Collect sources for a question and print their statistics.
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
struct ResearchArgs {
    /// Question to research.
    query: String,

    /// Output format: text, markdown, json or pdf.
    #[arg(long, default_value = "markdown")]
    format: ReportFormat,

    /// Replace the focus of every planned search.
    #[arg(long)]
    focus: Option<SearchFocus>,

    /// Append a reference list in this citation style (apa, mla, simple).
    #[arg(long)]
    citations: Option<CitationStyle>,

    /// Skip the academic metadata lookups.
    #[arg(long)]
    no_academic: bool,

    /// Write the report to this file instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Print the task trace to stderr after the run.
    #[arg(long)]
    trace: bool,

    /// Optional session identifier recorded in the report.
    #[arg(long)]
    session: Option<String>,
}

#[derive(Args, Debug)]
struct PapersArgs {
    /// Paper search query.
    query: String,

    /// Maximum number of papers to list.
    #[arg(long, default_value_t = 10)]
    max_results: usize,

    /// Print JSON instead of Markdown.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Question whose sources should be analysed.
    query: String,

    #[arg(long)]
    focus: Option<SearchFocus>,

    #[arg(long)]
    no_academic: bool,

    /// Print JSON instead of Markdown.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    }) {
        eprintln!("{err}");
    }
    metrics::init_metrics_from_env("citeflow-cli");

    let outcome = Runtime::new()
        .context("failed to start tokio runtime")
        .and_then(|rt| {
            rt.block_on(async move {
                match cli.command {
                    Command::Research(args) => research_command(&config, args).await,
                    Command::Papers(args) => papers_command(&config, args).await,
                    Command::Stats(args) => stats_command(&config, args).await,
                }
            })
        });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CiteflowError>() {
                Some(citeflow) => eprintln!("{}", citeflow.user_message()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn research_command(config: &Config, args: ResearchArgs) -> Result<()> {
    info!(query = %args.query, format = %args.format, "starting research run");
    let toolkit = ResearchToolkit::from_config(config)?;

    let mut options = ResearchOptions::new(&args.query)
        .with_focus(args.focus)
        .with_academic(!args.no_academic);
    if let Some(session) = args.session {
        options = options.with_session_id(session);
    }

    let outcome = run_research(&toolkit, options).await?;
    if args.trace {
        eprintln!("{}", outcome.trace_summary().render_markdown());
    }

    let report_options = ReportOptions {
        citation_style: args.citations,
        ..ReportOptions::default()
    };
    let bytes = render(&outcome, args.format, &report_options)?;

    match output_path(args.output, args.format, &outcome) {
        Some(path) => {
            write_report(&path, &bytes)?;
            eprintln!(
                "Report written to {} ({} sources, {} citations)",
                path.display(),
                outcome.result.sources.len(),
                outcome.result.citation_count()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            if !bytes.ends_with(b"\n") {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

/// Binary formats never go to stdout; they fall back to the timestamped default name.
fn output_path(explicit: Option<PathBuf>, format: ReportFormat, outcome: &ResearchOutcome) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path),
        None if format.is_binary() => Some(PathBuf::from(default_file_name(format, outcome.generated_at))),
        None => None,
    }
}

fn write_report(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

async fn papers_command(config: &Config, args: PapersArgs) -> Result<()> {
    let mut academic_config = config.academic.clone();
    academic_config.enabled = true;
    let academic = AcademicSearch::from_config(&academic_config, RetryPolicy::from(&config.retry))?;

    let max_results = args.max_results.max(1);
    let results = academic
        .search_with_limit(&args.query, max_results, Some(max_results))
        .await;
    for failure in &results.failures {
        warn!(provider = %failure.provider, reason = %failure.reason, "academic provider failed");
    }
    if results.sources.is_empty() && !results.failures.is_empty() {
        anyhow::bail!("every academic provider failed for \"{}\"", args.query);
    }

    if args.json {
        println!("{}", json::source_info(&results.sources)?);
    } else {
        println!("{}", markdown::paper_listing(&args.query, &results.sources));
    }
    Ok(())
}

async fn stats_command(config: &Config, args: StatsArgs) -> Result<()> {
    let toolkit = ResearchToolkit::from_config(config)?;
    let options = ResearchOptions::new(&args.query)
        .with_focus(args.focus)
        .with_academic(!args.no_academic);

    let collection = collect_sources(&toolkit, options).await?;
    let stats = SourceStatistics::from_sources(&collection.sources);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats.render_markdown());
        eprintln!("{} searches performed", collection.searches_performed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use citeflow_core::ResearchResult;

    fn outcome() -> ResearchOutcome {
        ResearchOutcome {
            session_id: "cli".into(),
            query: "q".into(),
            result: ResearchResult::new("body", Vec::new()),
            generated_at: chrono::Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap(),
            searches_performed: 0,
            trace_events: Vec::new(),
        }
    }

    #[test]
    fn research_flags_parse() {
        let cli = Cli::try_parse_from([
            "citeflow",
            "research",
            "grid storage",
            "--format",
            "pdf",
            "--focus",
            "news",
            "--citations",
            "mla",
            "--no-academic",
            "--trace",
        ])
        .unwrap();
        let Command::Research(args) = cli.command else {
            panic!("expected research command");
        };
        assert_eq!(args.format, ReportFormat::Pdf);
        assert_eq!(args.focus, Some(SearchFocus::News));
        assert_eq!(args.citations, Some(CitationStyle::Mla));
        assert!(args.no_academic && args.trace);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["citeflow", "research", "q", "--format", "docx"]).is_err());
    }

    #[test]
    fn pdf_defaults_to_timestamped_file() {
        let outcome = outcome();
        assert_eq!(
            output_path(None, ReportFormat::Pdf, &outcome),
            Some(PathBuf::from("research_report_20250304_050607.pdf"))
        );
        assert_eq!(output_path(None, ReportFormat::Markdown, &outcome), None);
    }

    #[test]
    fn write_report_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.md");
        write_report(&path, b"# Report\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "# Report\n");
    }
}
