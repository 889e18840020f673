use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::academic::AcademicSearch;
use crate::llm::LanguageModel;
use crate::prompts;
use crate::retry::RetryPolicy;
use crate::search::{SearchDepth, SearchFocus, SearchOutcome, SearchTool};
use crate::source::{Source, dedup_sources, sources_from_text};
use crate::trace::TraceEvent;
use crate::{CiteflowError, ResearchResult, TaskFailure};

/// Session context keys shared by the tasks and the workflow.
pub(crate) mod keys {
    pub const QUERY: &str = "query";
    pub const FOCUS_OVERRIDE: &str = "options.focus";
    pub const ACADEMIC_ENABLED: &str = "options.academic";
    pub const SOURCES_ONLY: &str = "options.sources_only";
    pub const PLAN: &str = "plan";
    pub const FINDINGS: &str = "research.findings";
    pub const SOURCES: &str = "research.sources";
    pub const SEARCH_ERRORS: &str = "research.errors";
    pub const HAS_MATERIAL: &str = "research.has_material";
    pub const REPORT: &str = "writer.report";
    pub const RESULT: &str = "final.result";
    pub const FAILURE: &str = "run.failure";
    pub const TRACE: &str = "trace.events";
}

/// Fallback URL extraction cap when a search returns text but no structured hits.
const TEXT_SOURCE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSearch {
    pub focus: SearchFocus,
    pub query: String,
}

impl PlannedSearch {
    fn new(focus: SearchFocus, query: impl Into<String>) -> Self {
        Self {
            focus,
            query: query.into(),
        }
    }
}

/// Eight searches spread over the four focus areas.
pub fn default_plan(query: &str) -> Vec<PlannedSearch> {
    vec![
        PlannedSearch::new(SearchFocus::General, format!("{query} overview")),
        PlannedSearch::new(SearchFocus::Academic, format!("{query} research papers")),
        PlannedSearch::new(SearchFocus::News, format!("{query} latest news developments")),
        PlannedSearch::new(SearchFocus::Technical, format!("{query} technical documentation")),
        PlannedSearch::new(SearchFocus::General, format!("{query} statistics data reports")),
        PlannedSearch::new(SearchFocus::General, format!("{query} expert opinions analysis")),
        PlannedSearch::new(SearchFocus::Academic, format!("{query} case studies examples")),
        PlannedSearch::new(SearchFocus::Technical, format!("{query} industry perspectives")),
    ]
}

/// Parse `focus | query` lines. Numbering, bullets and backticks are tolerated;
/// lines with an unknown focus or an empty query are skipped.
pub fn parse_plan(text: &str, max_searches: usize) -> Vec<PlannedSearch> {
    text.lines()
        .filter_map(|line| {
            let line = line
                .trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | ' '))
                .trim_matches('`')
                .trim();
            let (focus, query) = line.split_once('|')?;
            let focus: SearchFocus = focus.trim().parse().ok()?;
            let query = query.trim().trim_matches('"').trim();
            (!query.is_empty()).then(|| PlannedSearch::new(focus, query))
        })
        .take(max_searches)
        .collect()
}

/// Failed searches leave a note in the findings; those notes alone are not material.
pub(crate) fn has_material(sources: &[Source], findings: &[String], failures: &[TaskFailure]) -> bool {
    !sources.is_empty() || findings.len() > failures.len()
}

async fn record_trace(context: &Context, task_id: &str, message: impl Into<String>) {
    let mut events: Vec<TraceEvent> = context.get(keys::TRACE).await.unwrap_or_default();
    events.push(TraceEvent::new(task_id, message));
    context.set(keys::TRACE, &events).await;
}

/// Store the failure for the workflow and stop the graph.
async fn end_with_failure(context: &Context, task_id: &str, error: &CiteflowError) -> graph_flow::Result<TaskResult> {
    let failure = TaskFailure::from_error(task_id, error);
    warn!(task = task_id, kind = ?failure.kind, reason = %failure.reason, "task failed; ending run");
    record_trace(context, task_id, format!("failed: {}", failure.reason)).await;
    context.set(keys::FAILURE, &failure).await;
    Ok(TaskResult::new(Some(failure.reason), NextAction::End))
}

async fn query_of(context: &Context) -> String {
    context.get(keys::QUERY).await.unwrap_or_default()
}

pub struct PlannerTask {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    max_searches: usize,
}

impl PlannerTask {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy, max_searches: usize) -> Self {
        Self {
            llm,
            retry,
            max_searches,
        }
    }
}

#[async_trait]
impl Task for PlannerTask {
    fn id(&self) -> &str {
        "planner"
    }

    #[instrument(name = "task.planner", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query = query_of(&context).await;
        let prompt = prompts::planner_prompt(&query, self.max_searches);
        let llm = self.llm.clone();

        let planned = match self
            .retry
            .run("llm.plan", || llm.complete(prompts::PLANNER_SYSTEM, &prompt))
            .await
        {
            Ok(text) => parse_plan(&text, self.max_searches),
            Err(err) => {
                warn!(error = %err, "planning call failed; using default plan");
                Vec::new()
            }
        };

        let (mut plan, origin) = if planned.is_empty() {
            (default_plan(&query), "default")
        } else {
            (planned, "model")
        };
        plan.truncate(self.max_searches);

        if let Some(focus) = context.get::<SearchFocus>(keys::FOCUS_OVERRIDE).await {
            for step in plan.iter_mut() {
                step.focus = focus;
            }
        }

        info!(searches = plan.len(), origin, "search plan ready");
        record_trace(&context, self.id(), format!("planned {} searches ({origin} plan)", plan.len())).await;
        context.set(keys::PLAN, &plan).await;

        Ok(TaskResult::new(
            Some(format!("Planned {} searches for \"{query}\"", plan.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Runs the planned searches; owns the per-run search budget through its tool.
pub struct ResearchTask {
    search: SearchTool,
}

impl ResearchTask {
    pub fn new(search: SearchTool) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Task for ResearchTask {
    fn id(&self) -> &str {
        "researcher"
    }

    #[instrument(name = "task.research", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let plan: Vec<PlannedSearch> = context.get(keys::PLAN).await.unwrap_or_default();
        let mut findings: Vec<String> = Vec::new();
        let mut sources: Vec<Source> = Vec::new();
        let mut errors: Vec<TaskFailure> = Vec::new();

        for (idx, step) in plan.iter().enumerate() {
            match self.search.run(&step.query, step.focus, SearchDepth::Standard).await {
                Ok(SearchOutcome::Completed(report)) => {
                    let mut found = report.sources.clone();
                    if found.is_empty() {
                        found = sources_from_text(&report.results_text, TEXT_SOURCE_LIMIT);
                    }
                    if found.is_empty() {
                        record_trace(&context, self.id(), format!("search {} ({}) found nothing", report.count, step.focus)).await;
                        continue;
                    }
                    record_trace(
                        &context,
                        self.id(),
                        format!("search {} ({}) returned {} sources", report.count, step.focus, found.len()),
                    )
                    .await;
                    findings.push(report.summary());
                    sources.extend(found);
                }
                Ok(outcome @ SearchOutcome::BudgetExhausted { .. }) => {
                    record_trace(&context, self.id(), outcome.message()).await;
                    break;
                }
                Err(err) => {
                    warn!(query = %step.query, focus = %step.focus, error = %err, "planned search failed");
                    let note = format!(
                        "Search {} failed ({}): {}",
                        idx + 1,
                        step.focus,
                        crate::redact(&err.to_string())
                    );
                    record_trace(&context, self.id(), note.clone()).await;
                    findings.push(note);
                    errors.push(TaskFailure::from_error(self.id(), &err));
                }
            }
        }

        debug!(
            findings = findings.len(),
            sources = sources.len(),
            failures = errors.len(),
            "research task populated context"
        );

        context.set(keys::FINDINGS, &findings).await;
        context.set(keys::SOURCES, &sources).await;
        context.set(keys::SEARCH_ERRORS, &errors).await;

        Ok(TaskResult::new(
            Some(format!(
                "Completed {} of {} planned searches",
                self.search.budget().used(),
                plan.len()
            )),
            NextAction::ContinueAndExecute,
        ))
    }
}

pub struct AcademicTask {
    academic: Option<AcademicSearch>,
}

impl AcademicTask {
    pub fn new(academic: Option<AcademicSearch>) -> Self {
        Self { academic }
    }
}

#[async_trait]
impl Task for AcademicTask {
    fn id(&self) -> &str {
        "academic"
    }

    #[instrument(name = "task.academic", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query = query_of(&context).await;
        let enabled = context.get::<bool>(keys::ACADEMIC_ENABLED).await.unwrap_or(true);
        let mut sources: Vec<Source> = context.get(keys::SOURCES).await.unwrap_or_default();

        let response = match self.academic.as_ref().filter(|academic| enabled && !academic.is_empty()) {
            Some(academic) => {
                let results = academic.search(&query).await;
                for failure in &results.failures {
                    record_trace(
                        &context,
                        self.id(),
                        format!("{} skipped: {}", failure.provider, failure.reason),
                    )
                    .await;
                }
                record_trace(
                    &context,
                    self.id(),
                    format!("{} papers from {}", results.sources.len(), academic.provider_ids().join(", ")),
                )
                .await;
                let count = results.sources.len();
                sources.extend(results.sources);
                format!("Academic lookup added {count} papers")
            }
            None => {
                record_trace(&context, self.id(), "academic lookup skipped").await;
                "Academic lookup skipped".to_string()
            }
        };

        let findings: Vec<String> = context.get(keys::FINDINGS).await.unwrap_or_default();
        let errors: Vec<TaskFailure> = context.get(keys::SEARCH_ERRORS).await.unwrap_or_default();
        let material = has_material(&sources, &findings, &errors);
        context.set(keys::SOURCES, &sources).await;
        context.set_sync(keys::HAS_MATERIAL, material);

        let sources_only = context.get::<bool>(keys::SOURCES_ONLY).await.unwrap_or(false);
        let next = if sources_only {
            NextAction::End
        } else {
            NextAction::ContinueAndExecute
        };
        Ok(TaskResult::new(Some(response), next))
    }
}

/// Reached when neither searches nor academic lookups produced anything.
#[derive(Default)]
pub struct NoResultsTask;

#[async_trait]
impl Task for NoResultsTask {
    fn id(&self) -> &str {
        "no_results"
    }

    #[instrument(name = "task.no_results", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query = query_of(&context).await;
        let errors: Vec<TaskFailure> = context.get(keys::SEARCH_ERRORS).await.unwrap_or_default();

        let failure = match errors.into_iter().last() {
            Some(last) => last,
            None => TaskFailure::from_error(self.id(), &CiteflowError::NoResults { query: query.clone() }),
        };

        info!(kind = ?failure.kind, "run produced no material");
        record_trace(&context, self.id(), format!("no results: {}", failure.reason)).await;
        let reason = failure.reason.clone();
        context.set(keys::FAILURE, &failure).await;
        Ok(TaskResult::new(Some(reason), NextAction::End))
    }
}

pub struct WriterTask {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl WriterTask {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }
}

#[async_trait]
impl Task for WriterTask {
    fn id(&self) -> &str {
        "writer"
    }

    #[instrument(name = "task.writer", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query = query_of(&context).await;
        let findings: Vec<String> = context.get(keys::FINDINGS).await.unwrap_or_default();
        let errors: Vec<TaskFailure> = context.get(keys::SEARCH_ERRORS).await.unwrap_or_default();
        let sources = dedup_sources(context.get(keys::SOURCES).await.unwrap_or_default());

        let prompt = prompts::writer_prompt(&query, &findings, &sources, errors.len());
        let llm = self.llm.clone();
        let report = match self
            .retry
            .run("llm.write", || llm.complete(prompts::WRITER_SYSTEM, &prompt))
            .await
        {
            Ok(report) => report,
            Err(err) => return end_with_failure(&context, self.id(), &err).await,
        };

        info!(chars = report.len(), sources = sources.len(), model = self.llm.model_name(), "report drafted");
        record_trace(&context, self.id(), format!("report drafted from {} sources", sources.len())).await;
        context.set(keys::SOURCES, &sources).await;
        context.set(keys::REPORT, &report).await;

        Ok(TaskResult::new(
            Some("Report drafted".to_string()),
            NextAction::ContinueAndExecute,
        ))
    }
}

#[derive(Default)]
pub struct FinalizeTask;

#[async_trait]
impl Task for FinalizeTask {
    fn id(&self) -> &str {
        "finalize"
    }

    #[instrument(name = "task.finalize", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let report: String = context.get(keys::REPORT).await.unwrap_or_default();
        let sources: Vec<Source> = context.get(keys::SOURCES).await.unwrap_or_default();
        // The writer already merged and numbered these.
        let result = ResearchResult::from_deduped(report, sources);

        info!(
            sources = result.sources.len(),
            citations = result.citation_count(),
            words = result.word_count(),
            "finalize task completed"
        );
        record_trace(
            &context,
            self.id(),
            format!(
                "{} sources, {} cited, {} words",
                result.sources.len(),
                result.citation_count(),
                result.word_count()
            ),
        )
        .await;
        context.set(keys::RESULT, &result).await;

        Ok(TaskResult::new(Some("Research complete".to_string()), NextAction::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_lines_are_parsed_leniently() {
        let text = "1. general | solid state batteries overview\n\
                    - `academic | \"solid electrolyte interphase\"`\n\
                    musings without a separator\n\
                    poetry | not a focus\n\
                    news |   \n\
                    3) technical | battery management firmware";
        let plan = parse_plan(text, 8);
        assert_eq!(
            plan,
            vec![
                PlannedSearch::new(SearchFocus::General, "solid state batteries overview"),
                PlannedSearch::new(SearchFocus::Academic, "solid electrolyte interphase"),
                PlannedSearch::new(SearchFocus::Technical, "battery management firmware"),
            ]
        );
    }

    #[test]
    fn plan_respects_budget() {
        let text = (0..12).map(|n| format!("general | q{n}\n")).collect::<String>();
        assert_eq!(parse_plan(&text, 8).len(), 8);
    }

    #[test]
    fn default_plan_covers_every_focus() {
        let plan = default_plan("grid storage");
        assert_eq!(plan.len(), 8);
        for focus in [
            SearchFocus::General,
            SearchFocus::Academic,
            SearchFocus::News,
            SearchFocus::Technical,
        ] {
            assert!(plan.iter().any(|step| step.focus == focus));
        }
        assert!(plan.iter().all(|step| step.query.starts_with("grid storage")));
    }
}
