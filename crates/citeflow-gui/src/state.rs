use crate::config::AppConfig;
use crate::error::AppError;
use crate::metrics;
use axum::http::StatusCode;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use citeflow_core::{
    ResearchOptions, ResearchOutcome, ResearchToolkit, SearchFocus, run_research,
};
use dashmap::DashMap;
use serde::Serialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{self as stream, Stream, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    research_service: Arc<ResearchService>,
    assets_dir: Option<Arc<PathBuf>>,
    auth_token: Option<Arc<String>>,
}

impl AppState {
    pub fn new(toolkit: ResearchToolkit, config: &AppConfig) -> Self {
        Self {
            research_service: Arc::new(ResearchService::new(toolkit, config.max_concurrency)),
            assets_dir: config.assets_dir.clone().map(Arc::new),
            auth_token: config.auth_token.as_ref().map(|token| Arc::new(token.clone())),
        }
    }

    pub fn research_service(&self) -> Arc<ResearchService> {
        self.research_service.clone()
    }

    pub fn assets_dir(&self) -> Option<Arc<PathBuf>> {
        self.assets_dir.clone()
    }

    pub fn auth_token(&self) -> Option<Arc<String>> {
        self.auth_token.clone()
    }

    pub fn metrics(&self) -> ServiceMetrics {
        self.research_service.metrics()
    }
}

/// Runs research in background tasks, bounded by a semaphore.
pub struct ResearchService {
    toolkit: ResearchToolkit,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    runs: Arc<DashMap<String, RunRecord>>,
    streams: Arc<DashMap<String, broadcast::Sender<RunEvent>>>,
}

impl ResearchService {
    pub fn new(toolkit: ResearchToolkit, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            toolkit,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            runs: Arc::new(DashMap::new()),
            streams: Arc::new(DashMap::new()),
        }
    }

    pub fn start(&self, request: RunRequest) -> Result<String, AppError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(AppError::new(StatusCode::BAD_REQUEST, "query must not be empty"));
        }

        let run_id = request
            .run_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.runs.get(&run_id).is_some_and(|record| record.is_active()) {
            return Err(AppError::new(StatusCode::CONFLICT, "run is already in progress"));
        }

        let (sender, _rx) = broadcast::channel(32);
        self.streams.insert(run_id.clone(), sender.clone());
        self.runs.insert(
            run_id.clone(),
            RunRecord::Queued {
                query: query.clone(),
                submitted_at: Utc::now(),
            },
        );
        let _ = sender.send(RunEvent::queued());

        let mut options = ResearchOptions::new(&query)
            .with_session_id(run_id.clone())
            .with_focus(request.focus);
        if let Some(academic) = request.academic {
            options = options.with_academic(academic);
        }

        let toolkit = self.toolkit.clone();
        let semaphore = self.semaphore.clone();
        let runs = self.runs.clone();
        let streams = self.streams.clone();
        let run_id_for_task = run_id.clone();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    let event = RunEvent::error(&err.to_string());
                    let _ = sender.send(event.clone());
                    runs.insert(
                        run_id_for_task.clone(),
                        RunRecord::Failed {
                            query,
                            error: err.to_string(),
                            event,
                        },
                    );
                    streams.remove(&run_id_for_task);
                    return;
                }
            };

            runs.insert(
                run_id_for_task.clone(),
                RunRecord::Running {
                    query: query.clone(),
                    started_at: Utc::now(),
                },
            );
            let _ = sender.send(RunEvent::started());

            let result = run_research(&toolkit, options).await;
            drop(permit);
            let running = count_active(&runs).saturating_sub(1);

            match result {
                Ok(outcome) => {
                    info!(run_id = %run_id_for_task, "research run completed");
                    metrics::run_completed(
                        &run_id_for_task,
                        outcome.result.sources.len(),
                        outcome.result.citation_count(),
                        running,
                    );
                    let event = RunEvent::completed(&outcome);
                    runs.insert(
                        run_id_for_task.clone(),
                        RunRecord::Completed {
                            outcome: Arc::new(outcome),
                            event: event.clone(),
                        },
                    );
                    let _ = sender.send(event);
                }
                Err(err) => {
                    let message = err.user_message();
                    error!(run_id = %run_id_for_task, error = %citeflow_core::redact(&err.to_string()), "research run failed");
                    metrics::run_failed(&run_id_for_task, running, &message);
                    let event = RunEvent::error(&message);
                    runs.insert(
                        run_id_for_task.clone(),
                        RunRecord::Failed {
                            query,
                            error: message,
                            event: event.clone(),
                        },
                    );
                    let _ = sender.send(event);
                }
            }

            streams.remove(&run_id_for_task);
        });

        let snapshot = self.metrics();
        metrics::run_started(&run_id, snapshot.running_runs, snapshot.available_permits);
        Ok(run_id)
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.get(run_id).map(|record| record.status(run_id))
    }

    pub fn list(&self) -> Vec<RunStatus> {
        let mut runs: Vec<RunStatus> = self
            .runs
            .iter()
            .map(|entry| entry.value().status(entry.key()))
            .collect();
        runs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        runs
    }

    pub fn outcome(&self, run_id: &str) -> Option<Arc<ResearchOutcome>> {
        self.runs.get(run_id).and_then(|record| match record.value() {
            RunRecord::Completed { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
    }

    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            max_concurrency: self.max_concurrency,
            available_permits: self.semaphore.available_permits(),
            running_runs: count_active(&self.runs),
            total_runs: self.runs.len(),
        }
    }

    /// Finished runs replay their terminal event; active runs subscribe to live events.
    pub fn event_stream(&self, run_id: &str) -> Option<SseStream> {
        if let Some(stream) = self.terminal_stream(run_id) {
            return Some(stream);
        }

        let live = self.streams.get(run_id).map(|sender| {
            let rx = sender.subscribe();
            let stream = BroadcastStream::new(rx).filter_map(|event| match event {
                Ok(event) => Some(Result::<Event, Infallible>::Ok(event.into_sse_event())),
                Err(err) => {
                    warn!(error = %err, "run event stream lagged");
                    None
                }
            });
            Box::pin(stream) as SseStream
        });

        match live {
            Some(stream) => {
                metrics::stream_opened(run_id, self.streams.len());
                Some(stream)
            }
            // The run may have finished between the two lookups.
            None => self.terminal_stream(run_id),
        }
    }

    fn terminal_stream(&self, run_id: &str) -> Option<SseStream> {
        let record = self.runs.get(run_id)?;
        let event = match record.value() {
            RunRecord::Completed { event, .. } | RunRecord::Failed { event, .. } => event.clone(),
            RunRecord::Queued { .. } | RunRecord::Running { .. } => return None,
        };
        let stream = stream::iter(vec![Result::<Event, Infallible>::Ok(event.into_sse_event())]);
        Some(Box::pin(stream))
    }
}

fn count_active(runs: &DashMap<String, RunRecord>) -> usize {
    runs.iter().filter(|entry| entry.value().is_active()).count()
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[derive(Debug)]
pub enum RunRecord {
    Queued {
        query: String,
        submitted_at: DateTime<Utc>,
    },
    Running {
        query: String,
        started_at: DateTime<Utc>,
    },
    Completed {
        outcome: Arc<ResearchOutcome>,
        event: RunEvent,
    },
    Failed {
        query: String,
        error: String,
        event: RunEvent,
    },
}

impl RunRecord {
    fn is_active(&self) -> bool {
        matches!(self, RunRecord::Queued { .. } | RunRecord::Running { .. })
    }

    fn status(&self, run_id: &str) -> RunStatus {
        let mut status = RunStatus {
            run_id: run_id.to_string(),
            query: String::new(),
            state: RunState::Queued,
            submitted_at: None,
            summary: None,
            error: None,
        };
        match self {
            RunRecord::Queued { query, submitted_at } => {
                status.query = query.clone();
                status.submitted_at = Some(*submitted_at);
            }
            RunRecord::Running { query, started_at } => {
                status.query = query.clone();
                status.state = RunState::Running;
                status.submitted_at = Some(*started_at);
            }
            RunRecord::Completed { outcome, .. } => {
                status.query = outcome.query.clone();
                status.state = RunState::Completed;
                status.submitted_at = Some(outcome.generated_at);
                status.summary = Some(RunSummary::from(outcome.as_ref()));
            }
            RunRecord::Failed { query, error, .. } => {
                status.query = query.clone();
                status.state = RunState::Failed;
                status.error = Some(error.clone());
            }
        }
        status
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub sources: usize,
    pub citations: usize,
    pub words: usize,
    pub searches: usize,
    pub trace_events: usize,
}

impl From<&ResearchOutcome> for RunSummary {
    fn from(outcome: &ResearchOutcome) -> Self {
        Self {
            sources: outcome.result.sources.len(),
            citations: outcome.result.citation_count(),
            words: outcome.result.word_count(),
            searches: outcome.searches_performed,
            trace_events: outcome.trace_events.len(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    pub query: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceMetrics {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub running_runs: usize,
    pub total_runs: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunEvent {
    pub kind: RunEventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl RunEvent {
    fn queued() -> Self {
        Self {
            kind: RunEventKind::Queued,
            message: "run queued".into(),
            summary: None,
        }
    }

    fn started() -> Self {
        Self {
            kind: RunEventKind::Started,
            message: "run started".into(),
            summary: None,
        }
    }

    fn completed(outcome: &ResearchOutcome) -> Self {
        Self {
            kind: RunEventKind::Completed,
            message: "run completed".into(),
            summary: Some(RunSummary::from(outcome)),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            kind: RunEventKind::Error,
            message: message.to_string(),
            summary: None,
        }
    }

    pub fn into_sse_event(self) -> Event {
        let data = serde_json::to_string(&self).unwrap_or_else(|_| {
            serde_json::json!({
                "kind": RunEventKind::Error,
                "message": "failed to serialize run event",
            })
            .to_string()
        });

        Event::default().event(self.kind.as_str()).data(data)
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Queued,
    Started,
    Completed,
    Error,
}

impl RunEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            RunEventKind::Queued => "queued",
            RunEventKind::Started => "started",
            RunEventKind::Completed => "completed",
            RunEventKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub query: String,
    pub run_id: Option<String>,
    pub focus: Option<SearchFocus>,
    pub academic: Option<bool>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}
