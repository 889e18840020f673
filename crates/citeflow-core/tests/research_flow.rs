use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use citeflow_core::{
    AcademicProvider, AcademicSearch, CiteflowError, LanguageModel, ResearchOptions, ResearchToolkit, Result,
    RetryPolicy, SearchDepth, SearchFocus, SearchHit, SearchToolSettings, Source, SourceType, WebSearch,
    collect_sources, run_research,
};

struct ScriptedModel {
    plan: String,
    report: std::result::Result<String, u16>,
    writer_calls: AtomicUsize,
    writer_prompt: Mutex<Option<String>>,
}

impl ScriptedModel {
    fn new(plan: &str, report: &str) -> Arc<Self> {
        Arc::new(Self {
            plan: plan.to_string(),
            report: Ok(report.to_string()),
            writer_calls: AtomicUsize::new(0),
            writer_prompt: Mutex::new(None),
        })
    }

    fn failing_writer(plan: &str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            plan: plan.to_string(),
            report: Err(status),
            writer_calls: AtomicUsize::new(0),
            writer_prompt: Mutex::new(None),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
        if prompt.starts_with("Plan up to") {
            return Ok(self.plan.clone());
        }
        self.writer_calls.fetch_add(1, Ordering::SeqCst);
        *self.writer_prompt.lock().unwrap() = Some(prompt.to_string());
        match &self.report {
            Ok(report) => Ok(report.clone()),
            Err(status) => Err(CiteflowError::from_status("scripted", *status, "failure")),
        }
    }
}

enum SearchBehaviour {
    Hits,
    Empty,
    RateLimited,
    NewsUnavailable,
}

struct ScriptedSearch {
    behaviour: SearchBehaviour,
    queries: Mutex<Vec<(String, SearchDepth)>>,
}

impl ScriptedSearch {
    fn new(behaviour: SearchBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<(String, SearchDepth)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, depth: SearchDepth) -> Result<Vec<SearchHit>> {
        let call = {
            let mut queries = self.queries.lock().unwrap();
            queries.push((query.to_string(), depth));
            queries.len()
        };
        match self.behaviour {
            SearchBehaviour::Hits => Ok(vec![
                SearchHit {
                    title: format!("Result {call}"),
                    url: format!("https://example.com/result-{call}"),
                    content: "Findings about grid storage.".into(),
                    date: Some("2024-06-01".into()),
                },
                // Every search also returns the same shared page.
                SearchHit {
                    title: "Shared overview".into(),
                    url: "https://www.shared.example.org/overview/".into(),
                    content: "Overview".into(),
                    date: None,
                },
            ]),
            SearchBehaviour::NewsUnavailable if query.contains("news") => Err(CiteflowError::from_status(
                "linkup",
                503,
                "upstream unavailable",
            )),
            SearchBehaviour::NewsUnavailable => Ok(vec![SearchHit {
                title: "Grid overview".into(),
                url: "https://example.com/grid-overview".into(),
                content: "Background on grid storage.".into(),
                date: None,
            }]),
            SearchBehaviour::Empty => Ok(Vec::new()),
            SearchBehaviour::RateLimited => Err(CiteflowError::RateLimited {
                service: "linkup".into(),
            }),
        }
    }
}

struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl AcademicProvider for CountingProvider {
    fn id(&self) -> &'static str {
        "counting"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<Source>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Source::paper("Grid-scale storage review", "https://doi.org/10.1000/grid")
                .with_doi(Some("10.1000/grid".into()))
                .with_authors(vec!["Ada Lovelace".into()]),
        ])
    }
}

const PLAN: &str = "general | grid storage overview\nnews | grid storage news";
const REPORT: &str = "# Grid Storage\n\n## Executive Summary\n\nCosts fell [1]. Shared data [2]. Papers agree [4]. Unknown [42].";

fn toolkit(llm: Arc<ScriptedModel>, web: Arc<ScriptedSearch>) -> ResearchToolkit {
    ResearchToolkit::new(llm, web)
        .with_retry(RetryPolicy::none())
        .with_search_settings(SearchToolSettings {
            rate_limit: Duration::ZERO,
            max_result_chars: 5000,
            retry: RetryPolicy::none(),
        })
}

fn academic(provider: Arc<CountingProvider>) -> AcademicSearch {
    AcademicSearch::new(vec![provider], 5, RetryPolicy::none())
}

#[tokio::test]
async fn full_run_collects_dedups_and_counts_citations() {
    let llm = ScriptedModel::new(PLAN, REPORT);
    let web = ScriptedSearch::new(SearchBehaviour::Hits);
    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let toolkit = toolkit(llm.clone(), web.clone()).with_academic(academic(provider.clone()));

    let outcome = run_research(&toolkit, ResearchOptions::new("grid storage").with_session_id("s-1"))
        .await
        .expect("research run should succeed");

    assert_eq!(outcome.session_id, "s-1");
    assert_eq!(outcome.searches_performed, 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm.writer_calls.load(Ordering::SeqCst), 1);

    // Two distinct results, one shared page (deduplicated) and one paper.
    let titles: Vec<&str> = outcome.result.sources.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Result 1", "Shared overview", "Result 2", "Grid-scale storage review"]
    );
    assert_eq!(outcome.result.sources[3].source_type, SourceType::Paper);

    assert_eq!(outcome.result.citations.get(&1), Some(&1));
    assert_eq!(outcome.result.citations.get(&4), Some(&1));
    assert!(!outcome.result.citations.contains_key(&42));
    assert_eq!(outcome.result.citation_count(), 3);

    let tasks: Vec<&str> = outcome.trace_events.iter().map(|e| e.task_id.as_str()).collect();
    for task in ["planner", "researcher", "academic", "writer", "finalize"] {
        assert!(tasks.contains(&task), "missing trace for {task}: {tasks:?}");
    }

    let queries = web.queries();
    assert_eq!(queries[0], ("grid storage overview".to_string(), SearchDepth::Standard));
    assert!(queries[1].0.contains("site:reuters.com"));
}

#[tokio::test]
async fn focus_override_and_budget_apply_per_run() {
    let llm = ScriptedModel::new("not a plan at all", REPORT);
    let web = ScriptedSearch::new(SearchBehaviour::Hits);
    let toolkit = toolkit(llm, web.clone()).with_max_searches(3);

    let options = ResearchOptions::new("grid storage")
        .with_focus(Some(SearchFocus::Academic))
        .with_academic(false);
    let first = run_research(&toolkit, options.clone()).await.unwrap();
    assert_eq!(first.searches_performed, 3);

    // A second run starts with a fresh budget.
    let second = run_research(&toolkit, options).await.unwrap();
    assert_eq!(second.searches_performed, 3);

    let queries = web.queries();
    assert_eq!(queries.len(), 6);
    assert!(queries.iter().all(|(q, depth)| q.contains("site:arxiv.org") && *depth == SearchDepth::Deep));
}

#[tokio::test]
async fn academic_toggle_skips_providers() {
    let llm = ScriptedModel::new(PLAN, REPORT);
    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let toolkit = toolkit(llm, ScriptedSearch::new(SearchBehaviour::Hits)).with_academic(academic(provider.clone()));

    let outcome = run_research(&toolkit, ResearchOptions::new("grid storage").with_academic(false))
        .await
        .unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(outcome.result.sources.iter().all(|s| s.source_type != SourceType::Paper));
}

#[tokio::test]
async fn empty_searches_end_with_no_results() {
    let llm = ScriptedModel::new(PLAN, REPORT);
    let toolkit = toolkit(llm.clone(), ScriptedSearch::new(SearchBehaviour::Empty));

    let err = run_research(&toolkit, ResearchOptions::new("unknowable topic"))
        .await
        .unwrap_err();
    assert!(matches!(err, CiteflowError::NoResults { ref query } if query == "unknowable topic"));
    assert_eq!(llm.writer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limited_searches_surface_rate_limit() {
    let llm = ScriptedModel::new(PLAN, REPORT);
    let toolkit = toolkit(llm, ScriptedSearch::new(SearchBehaviour::RateLimited));

    let err = run_research(&toolkit, ResearchOptions::new("grid storage"))
        .await
        .unwrap_err();
    assert!(matches!(err, CiteflowError::RateLimited { .. }));
    assert!(err.user_message().contains("rate limited"));
}

#[tokio::test]
async fn failed_search_is_noted_for_the_writer() {
    let llm = ScriptedModel::new(PLAN, "# Grid Storage\n\nBackground [1].");
    let toolkit = toolkit(llm.clone(), ScriptedSearch::new(SearchBehaviour::NewsUnavailable));

    let outcome = run_research(&toolkit, ResearchOptions::new("grid storage")).await.unwrap();
    assert_eq!(outcome.result.sources.len(), 1);
    assert_eq!(outcome.result.citations.get(&1), Some(&1));

    let prompt = llm.writer_prompt.lock().unwrap().clone().unwrap_or_default();
    assert!(prompt.contains("Search 2 failed (news)"), "writer prompt: {prompt}");
    assert!(prompt.contains("1 planned search(es) failed"));
    assert!(
        outcome
            .trace_events
            .iter()
            .any(|event| event.task_id == "researcher" && event.message.starts_with("Search 2 failed"))
    );

    let collection = collect_sources(&toolkit, ResearchOptions::new("grid storage")).await.unwrap();
    assert_eq!(collection.sources.len(), 1);
    assert_eq!(collection.findings.len(), 2);
}

#[tokio::test]
async fn academic_results_alone_are_enough_material() {
    let llm = ScriptedModel::new(PLAN, REPORT);
    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let toolkit = toolkit(llm, ScriptedSearch::new(SearchBehaviour::Empty)).with_academic(academic(provider));

    let outcome = run_research(&toolkit, ResearchOptions::new("grid storage")).await.unwrap();
    assert_eq!(outcome.result.sources.len(), 1);
    assert_eq!(outcome.result.sources[0].doi.as_deref(), Some("10.1000/grid"));
}

#[tokio::test]
async fn writer_failure_is_reported_as_api_error() {
    let llm = ScriptedModel::failing_writer(PLAN, 401);
    let toolkit = toolkit(llm, ScriptedSearch::new(SearchBehaviour::Hits));

    let err = run_research(&toolkit, ResearchOptions::new("grid storage"))
        .await
        .unwrap_err();
    assert!(err.is_external());
    assert!(err.to_string().contains("scripted"));
}

#[tokio::test]
async fn collect_sources_skips_the_writer() {
    let llm = ScriptedModel::new(PLAN, REPORT);
    let toolkit = toolkit(llm.clone(), ScriptedSearch::new(SearchBehaviour::Hits));

    let collection = collect_sources(&toolkit, ResearchOptions::new("grid storage"))
        .await
        .unwrap();
    assert_eq!(collection.sources.len(), 3);
    assert_eq!(collection.findings.len(), 2);
    assert_eq!(collection.searches_performed, 2);
    assert_eq!(llm.writer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let toolkit = toolkit(ScriptedModel::new(PLAN, REPORT), ScriptedSearch::new(SearchBehaviour::Hits));
    let err = run_research(&toolkit, ResearchOptions::new("   ")).await.unwrap_err();
    assert!(matches!(err, CiteflowError::InvalidConfiguration(_)));
}
