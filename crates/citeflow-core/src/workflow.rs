use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session, SessionStorage, Task,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::academic::AcademicSearch;
use crate::config::Config;
use crate::llm::{LanguageModel, build_language_model};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::search::{LinkupClient, SearchBudget, SearchFocus, SearchTool, SearchToolSettings, WebSearch};
use crate::source::{Source, dedup_sources};
use crate::tasks::{
    AcademicTask, FinalizeTask, NoResultsTask, PlannerTask, ResearchTask, WriterTask, has_material, keys,
};
use crate::trace::TraceEvent;
use crate::{CiteflowError, ResearchOutcome, ResearchResult, Result, TaskFailure};

/// Upper bound on runner invocations for one session.
const MAX_RUNNER_STEPS: usize = 32;

/// External services and settings shared by every run.
#[derive(Clone)]
pub struct ResearchToolkit {
    llm: Arc<dyn LanguageModel>,
    web: Arc<dyn WebSearch>,
    academic: Option<AcademicSearch>,
    retry: RetryPolicy,
    search_settings: SearchToolSettings,
    max_searches: usize,
}

impl ResearchToolkit {
    pub fn new(llm: Arc<dyn LanguageModel>, web: Arc<dyn WebSearch>) -> Self {
        let config = Config::default();
        let retry = RetryPolicy::from(&config.retry);
        Self {
            llm,
            web,
            academic: None,
            retry,
            search_settings: SearchToolSettings::from_config(&config.search, retry),
            max_searches: config.search.max_searches,
        }
    }

    /// Wire the live clients named by `config`. Fails when a required key is missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate_secrets()?;
        let retry = RetryPolicy::from(&config.retry);
        let llm = build_language_model(&config.llm)?;
        let web: Arc<dyn WebSearch> = Arc::new(LinkupClient::from_config(&config.search)?);
        let academic = AcademicSearch::from_config(&config.academic, retry)?;

        info!(
            provider = %config.llm.provider(),
            model = %config.llm.model(),
            max_searches = config.search.max_searches,
            academic = ?academic.provider_ids(),
            "research toolkit ready"
        );

        Ok(Self {
            llm,
            web,
            academic: (!academic.is_empty()).then_some(academic),
            retry,
            search_settings: SearchToolSettings::from_config(&config.search, retry),
            max_searches: config.search.max_searches.max(1),
        })
    }

    pub fn with_academic(mut self, academic: AcademicSearch) -> Self {
        self.academic = Some(academic);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.search_settings.retry = retry;
        self
    }

    pub fn with_search_settings(mut self, settings: SearchToolSettings) -> Self {
        self.search_settings = settings;
        self
    }

    pub fn with_max_searches(mut self, max_searches: usize) -> Self {
        self.max_searches = max_searches.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    pub query: String,
    pub session_id: Option<String>,
    /// Replace the focus of every planned search.
    pub focus: Option<SearchFocus>,
    pub academic: bool,
}

impl ResearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            focus: None,
            academic: true,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_focus(mut self, focus: Option<SearchFocus>) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_academic(mut self, enabled: bool) -> Self {
        self.academic = enabled;
        self
    }
}

/// Sources gathered without writing a report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCollection {
    pub query: String,
    pub sources: Vec<Source>,
    pub findings: Vec<String>,
    pub searches_performed: usize,
}

fn build_graph(toolkit: &ResearchToolkit, search: SearchTool) -> (Arc<Graph>, String) {
    let planner = Arc::new(PlannerTask::new(toolkit.llm.clone(), toolkit.retry, toolkit.max_searches));
    let researcher = Arc::new(ResearchTask::new(search));
    let academic = Arc::new(AcademicTask::new(toolkit.academic.clone()));
    let no_results = Arc::new(NoResultsTask);
    let writer = Arc::new(WriterTask::new(toolkit.llm.clone(), toolkit.retry));
    let finalize = Arc::new(FinalizeTask);

    let graph = GraphBuilder::new("citeflow_research")
        .add_task(planner.clone())
        .add_task(researcher.clone())
        .add_task(academic.clone())
        .add_task(no_results.clone())
        .add_task(writer.clone())
        .add_task(finalize.clone())
        .add_edge(planner.id(), researcher.id())
        .add_edge(researcher.id(), academic.id())
        .add_conditional_edge(
            academic.id(),
            |ctx| ctx.get_sync::<bool>(keys::HAS_MATERIAL).unwrap_or(false),
            writer.id(),
            no_results.id(),
        )
        .add_edge(writer.id(), finalize.id())
        .set_start_task(planner.id())
        .build();

    (Arc::new(graph), planner.id().to_string())
}

fn new_session_id() -> String {
    format!("research-{}", Uuid::new_v4())
}

struct CompletedSession {
    session: Session,
    searches_performed: usize,
}

async fn execute(toolkit: &ResearchToolkit, options: &ResearchOptions, sources_only: bool) -> Result<CompletedSession> {
    let query = options.query.trim();
    if query.is_empty() {
        return Err(CiteflowError::InvalidConfiguration("query must not be empty".into()));
    }

    // A fresh tool per run: the search budget is never shared between runs.
    let budget = Arc::new(SearchBudget::new(toolkit.max_searches));
    let search = SearchTool::new(toolkit.web.clone(), budget.clone(), toolkit.search_settings.clone());
    let (graph, start_task) = build_graph(toolkit, search);

    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(graph, storage.clone());

    let session_id = options.session_id.clone().unwrap_or_else(new_session_id);
    let session = Session::new_from_task(session_id.clone(), &start_task);
    session.context.set(keys::QUERY, query.to_string()).await;
    session.context.set(keys::ACADEMIC_ENABLED, options.academic).await;
    session.context.set(keys::SOURCES_ONLY, sources_only).await;
    if let Some(focus) = options.focus {
        session.context.set(keys::FOCUS_OVERRIDE, focus).await;
    }

    storage
        .save(session)
        .await
        .map_err(|err| anyhow::anyhow!("failed to persist session: {err}"))?;

    let mut steps = 0;
    loop {
        steps += 1;
        if steps > MAX_RUNNER_STEPS {
            return Err(anyhow::anyhow!("research graph did not complete after {MAX_RUNNER_STEPS} steps").into());
        }

        let result = runner
            .run(&session_id)
            .await
            .map_err(|err| anyhow::anyhow!("graph execution failure: {err}"))?;

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::Error(message) => return Err(anyhow::anyhow!(message).into()),
            _ => continue,
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|err| anyhow::anyhow!("failed to reload session: {err}"))?
        .ok_or_else(|| anyhow::anyhow!("session missing after execution"))?;

    if let Some(failure) = session.context.get::<TaskFailure>(keys::FAILURE).await {
        return Err(failure.into_error(query));
    }

    Ok(CompletedSession {
        session,
        searches_performed: budget.used(),
    })
}

/// Run the full pipeline for one query and return the cited report.
#[instrument(name = "research.run", skip(toolkit, options), fields(query = %options.query))]
pub async fn run_research(toolkit: &ResearchToolkit, options: ResearchOptions) -> Result<ResearchOutcome> {
    let started = Instant::now();
    let completed = match execute(toolkit, &options, false).await {
        Ok(completed) => completed,
        Err(err) => {
            let status = if matches!(err, CiteflowError::NoResults { .. }) {
                "no_results"
            } else {
                "failed"
            };
            metrics::record_research_run(status, started.elapsed().as_millis() as u64, 0);
            warn!(error = %err, "research run failed");
            return Err(err);
        }
    };

    let context = &completed.session.context;
    let result: ResearchResult = context
        .get(keys::RESULT)
        .await
        .ok_or_else(|| anyhow::anyhow!("no research result recorded"))?;
    let trace_events: Vec<TraceEvent> = context.get(keys::TRACE).await.unwrap_or_default();

    let elapsed_ms = started.elapsed().as_millis() as u64;
    metrics::record_research_run("completed", elapsed_ms, result.sources.len());
    info!(
        session = %completed.session.id,
        sources = result.sources.len(),
        citations = result.citation_count(),
        searches = completed.searches_performed,
        elapsed_ms,
        "research run completed"
    );

    Ok(ResearchOutcome {
        session_id: completed.session.id.clone(),
        query: options.query.trim().to_string(),
        result,
        generated_at: Utc::now(),
        searches_performed: completed.searches_performed,
        trace_events,
    })
}

/// Run planning, searches and academic lookups only; no report is written.
#[instrument(name = "research.collect", skip(toolkit, options), fields(query = %options.query))]
pub async fn collect_sources(toolkit: &ResearchToolkit, options: ResearchOptions) -> Result<SourceCollection> {
    let completed = execute(toolkit, &options, true).await?;
    let context = &completed.session.context;

    let sources: Vec<Source> = dedup_sources(context.get(keys::SOURCES).await.unwrap_or_default());
    let findings: Vec<String> = context.get(keys::FINDINGS).await.unwrap_or_default();
    let errors: Vec<TaskFailure> = context.get(keys::SEARCH_ERRORS).await.unwrap_or_default();
    if !has_material(&sources, &findings, &errors) {
        return Err(match errors.into_iter().last() {
            Some(failure) => failure.into_error(&options.query),
            None => CiteflowError::NoResults {
                query: options.query.clone(),
            },
        });
    }

    Ok(SourceCollection {
        query: options.query.trim().to_string(),
        sources,
        findings,
        searches_performed: completed.searches_performed,
    })
}
