use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query},
    http::{StatusCode, Uri, header, request::Parts},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use citeflow_core::{
    CitationStyle, ReportFormat, ReportOptions, ResearchOutcome, SearchFocus, Source, SourceStatistics,
    default_file_name, render,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use crate::error::AppError;
use crate::state::{AppState, RunRequest, RunState, RunStatus, ServiceMetrics, SseStream};

#[derive(Debug, Deserialize)]
pub struct StartResearchRequest {
    pub query: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub academic: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StartResearchResponse {
    pub run_id: String,
    pub state: RunState,
    pub capacity: ServiceMetrics,
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunStatus>,
    pub capacity: ServiceMetrics,
}

#[derive(Debug, Serialize)]
pub struct SourcesResponse {
    pub run_id: String,
    pub query: String,
    pub statistics: SourceStatistics,
    /// Citation index to number of occurrences in the report.
    pub citations: BTreeMap<usize, usize>,
    pub sources: Vec<Source>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub citations: Option<String>,
    #[serde(default)]
    pub summary: Option<bool>,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/research", post(start_research).get(list_runs))
        .route("/research/:id", get(get_run))
        .route("/research/:id/sources", get(get_sources))
        .route("/research/:id/download/:format", get(download_report))
        .route("/research/:id/stream", get(stream_run))
}

#[instrument(skip_all, fields(run_id = %payload.run_id.as_deref().unwrap_or("new")))]
async fn start_research(
    GuardedState(state): GuardedState,
    Json(payload): Json<StartResearchRequest>,
) -> Result<(StatusCode, Json<StartResearchResponse>), AppError> {
    let focus = payload
        .focus
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<SearchFocus>)
        .transpose()?;

    let request = RunRequest {
        query: payload.query,
        run_id: payload.run_id,
        focus,
        academic: payload.academic,
    };

    let service = state.research_service();
    let run_id = service.start(request)?;
    let state_snapshot = service
        .status(&run_id)
        .map(|status| status.state)
        .unwrap_or(RunState::Queued);

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResearchResponse {
            run_id,
            state: state_snapshot,
            capacity: service.metrics(),
        }),
    ))
}

async fn list_runs(GuardedState(state): GuardedState) -> Json<ListRunsResponse> {
    let service = state.research_service();
    Json(ListRunsResponse {
        runs: service.list(),
        capacity: service.metrics(),
    })
}

async fn get_run(
    GuardedState(state): GuardedState,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, AppError> {
    state
        .research_service()
        .status(&run_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("run"))
}

async fn get_sources(
    GuardedState(state): GuardedState,
    Path(run_id): Path<String>,
) -> Result<Json<SourcesResponse>, AppError> {
    let outcome = completed_outcome(&state, &run_id)?;
    Ok(Json(SourcesResponse {
        run_id,
        query: outcome.query.clone(),
        statistics: outcome.result.statistics(),
        citations: outcome.result.citations.clone(),
        sources: outcome.result.sources.clone(),
    }))
}

#[instrument(skip_all, fields(run_id = %run_id, format = %format))]
async fn download_report(
    GuardedState(state): GuardedState,
    Path((run_id, format)): Path<(String, String)>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    let format: ReportFormat = format.parse()?;
    let citation_style = params
        .citations
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<CitationStyle>)
        .transpose()?;
    let options = ReportOptions {
        citation_style,
        source_summary: params.summary.unwrap_or(true),
    };

    let outcome = completed_outcome(&state, &run_id)?;
    let file_name = default_file_name(format, outcome.generated_at);
    let rendering = outcome.clone();
    let bytes = tokio::task::spawn_blocking(move || render(&rendering, format, &options))
        .await
        .map_err(AppError::internal)??;

    crate::metrics::report_downloaded(&run_id, format.as_str(), bytes.len());
    Ok((
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn stream_run(
    GuardedState(state): GuardedState,
    Path(run_id): Path<String>,
) -> Result<Sse<SseStream>, AppError> {
    match state.research_service().event_stream(&run_id) {
        Some(stream) => Ok(Sse::new(stream).keep_alive(KeepAlive::new())),
        None => Err(AppError::not_found("run")),
    }
}

/// Outcome of a finished run; 409 while it is still in flight.
fn completed_outcome(state: &AppState, run_id: &str) -> Result<Arc<ResearchOutcome>, AppError> {
    let service = state.research_service();
    if let Some(outcome) = service.outcome(run_id) {
        return Ok(outcome);
    }

    match service.status(run_id) {
        Some(status) if matches!(status.state, RunState::Queued | RunState::Running) => {
            Err(AppError::new(StatusCode::CONFLICT, "run is still in progress"))
        }
        Some(status) => Err(AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            status.error.unwrap_or_else(|| "run failed".to_string()),
        )),
        None => Err(AppError::not_found("run")),
    }
}

/// Rejects API calls without the configured token, sent as a bearer header or
/// as `access_token` in the query string (browsers cannot set headers on SSE).
pub struct GuardedState(pub AppState);

#[async_trait]
impl FromRequestParts<AppState> for GuardedState {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let app_state = state.clone();

        if let Some(expected) = app_state.auth_token() {
            let provided = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .map(str::to_string)
                .or_else(|| query_token(&parts.uri));

            match provided.as_deref() {
                Some(token) if token == expected.as_str() => {}
                _ => {
                    return Err(AppError::new(StatusCode::UNAUTHORIZED, "invalid auth token"));
                }
            }
        }

        Ok(GuardedState(app_state))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    access_token: Option<String>,
}

fn query_token(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()?
        .0
        .access_token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::query_token;
    use axum::http::Uri;

    #[test]
    fn access_token_is_read_from_query() {
        let uri: Uri = "/api/research?citations=apa&access_token=abc".parse().unwrap();
        assert_eq!(query_token(&uri), Some("abc".into()));
        assert_eq!(query_token(&"/api/research?access_token=".parse().unwrap()), None);
        assert_eq!(query_token(&"/api/research".parse().unwrap()), None);
    }

    #[test]
    fn access_token_is_percent_decoded() {
        let uri: Uri = "/api/research/r1/stream?access_token=a%2Bb%2Fc%3D%3D".parse().unwrap();
        assert_eq!(query_token(&uri), Some("a+b/c==".into()));
    }
}
