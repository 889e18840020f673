use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::http::{HeaderValue, header};
use axum_test::TestServer;
use citeflow_core::{
    CiteflowError, LanguageModel, ResearchToolkit, Result, RetryPolicy, SearchDepth, SearchHit, SearchToolSettings,
    WebSearch,
};
use citeflow_gui::config::AppConfig;
use citeflow_gui::routes::build_router;
use citeflow_gui::state::AppState;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep, timeout};

struct CannedModel;

#[async_trait]
impl LanguageModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
        if prompt.starts_with("Plan up to") {
            return Ok("general | heat pumps overview".into());
        }
        Ok("# Heat Pumps\n\nEfficiency keeps improving [1].".into())
    }
}

struct CannedSearch {
    empty: bool,
}

#[async_trait]
impl WebSearch for CannedSearch {
    fn name(&self) -> &str {
        "canned"
    }

    async fn search(&self, _query: &str, _depth: SearchDepth) -> Result<Vec<SearchHit>> {
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![SearchHit {
            title: "Heat pump efficiency".into(),
            url: "https://www.example.com/heat-pumps".into(),
            content: "COP values above 4".into(),
            date: Some("2024-02-01".into()),
        }])
    }
}

fn toolkit(empty: bool) -> ResearchToolkit {
    ResearchToolkit::new(Arc::new(CannedModel), Arc::new(CannedSearch { empty }))
        .with_retry(RetryPolicy::none())
        .with_search_settings(SearchToolSettings {
            rate_limit: StdDuration::ZERO,
            max_result_chars: 5000,
            retry: RetryPolicy::none(),
        })
}

fn server(config: AppConfig, empty: bool) -> TestServer {
    let state = AppState::new(toolkit(empty), &config);
    TestServer::new(build_router(state)).unwrap()
}

async fn start_and_wait(server: &TestServer, query: &str) -> (String, Value) {
    let response = server.post("/api/research").json(&json!({ "query": query })).await;
    assert_eq!(response.status_code(), 202);
    let run_id = response.json::<Value>()["run_id"]
        .as_str()
        .expect("run id missing")
        .to_string();

    let status_path = format!("/api/research/{run_id}");
    let status = timeout(Duration::from_secs(5), async {
        loop {
            let response = server.get(&status_path).await;
            assert_eq!(response.status_code(), 200);
            let payload = response.json::<Value>();
            if payload["state"] == "completed" || payload["state"] == "failed" {
                return payload;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("run did not finish in time");

    (run_id, status)
}

#[tokio::test]
async fn health_and_index_are_public() {
    let mut config = AppConfig::default();
    config.auth_token = Some("secret".into());
    let server = server(config, false);

    let response = server.get("/health/live").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>()["metrics"]["max_concurrency"], 2);

    assert_eq!(server.get("/health/ready").await.status_code(), 200);

    let page = server.get("/").await;
    assert_eq!(page.status_code(), 200);
    assert!(page.text().contains("<title>Citeflow</title>"));

    assert_eq!(server.get("/missing.js").await.status_code(), 404);
}

#[tokio::test]
async fn api_requires_bearer_token_when_configured() {
    let mut config = AppConfig::default();
    config.auth_token = Some("secret".into());
    let server = server(config, false);

    let response = server.get("/api/research").await;
    assert_eq!(response.status_code(), 401);

    let response = server
        .get("/api/research")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert!(response.json::<Value>()["runs"].is_array());

    let response = server.get("/api/research?access_token=secret").await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn query_token_with_reserved_characters_is_decoded() {
    let mut config = AppConfig::default();
    config.auth_token = Some("s3cr+t/=".into());
    let server = server(config, false);

    let response = server.get("/api/research?access_token=s3cr%2Bt%2F%3D").await;
    assert_eq!(response.status_code(), 200);

    let response = server.get("/api/research?access_token=s3cr+t/=").await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let server = server(AppConfig::default(), false);

    let response = server.post("/api/research").json(&json!({ "query": "   " })).await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/api/research")
        .json(&json!({ "query": "heat pumps", "focus": "gossip" }))
        .await;
    assert_eq!(response.status_code(), 400);

    assert_eq!(server.get("/api/research/nope").await.status_code(), 404);
    assert_eq!(server.get("/api/research/nope/stream").await.status_code(), 404);
}

#[tokio::test]
async fn completed_run_exposes_sources_downloads_and_stream() {
    let server = server(AppConfig::default(), false);
    let (run_id, status) = start_and_wait(&server, "heat pumps").await;

    assert_eq!(status["state"], "completed");
    assert_eq!(status["summary"]["sources"], 1);
    assert_eq!(status["summary"]["citations"], 1);

    let sources = server.get(&format!("/api/research/{run_id}/sources")).await;
    assert_eq!(sources.status_code(), 200);
    let sources = sources.json::<Value>();
    assert_eq!(sources["sources"][0]["url"], "https://www.example.com/heat-pumps");
    assert_eq!(sources["statistics"]["total"], 1);
    assert_eq!(sources["citations"]["1"], 1);

    let download = server
        .get(&format!("/api/research/{run_id}/download/markdown?citations=apa"))
        .await;
    assert_eq!(download.status_code(), 200);
    let disposition = download.header(header::CONTENT_DISPOSITION);
    let disposition = disposition.to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"research_report_"));
    assert!(disposition.ends_with(".md\""));
    let body = download.text();
    assert!(body.contains("# Heat Pumps"));
    assert!(body.contains("Heat pump efficiency"));

    let json_report = server.get(&format!("/api/research/{run_id}/download/json")).await;
    assert_eq!(json_report.status_code(), 200);
    assert_eq!(json_report.json::<Value>()["query"], "heat pumps");

    let unknown = server.get(&format!("/api/research/{run_id}/download/docx")).await;
    assert_eq!(unknown.status_code(), 400);

    let stream = server.get(&format!("/api/research/{run_id}/stream")).await;
    assert_eq!(stream.status_code(), 200);
    let body = stream.text();
    assert!(body.contains("event: completed"), "stream missing completed event: {body}");
    assert!(body.contains("\"kind\":\"completed\""), "stream payload missing kind: {body}");

    let list = server.get("/api/research").await.json::<Value>();
    assert_eq!(list["runs"].as_array().map(Vec::len), Some(1));
    assert_eq!(list["capacity"]["running_runs"], 0);
}

#[tokio::test]
async fn failed_run_reports_user_message() {
    let server = server(AppConfig::default(), true);
    let (run_id, status) = start_and_wait(&server, "nothing to find").await;

    assert_eq!(status["state"], "failed");
    let error = status["error"].as_str().unwrap_or_default();
    assert!(error.contains("No results found"), "unexpected error: {error}");

    let sources = server.get(&format!("/api/research/{run_id}/sources")).await;
    assert_eq!(sources.status_code(), 422);

    let stream = server.get(&format!("/api/research/{run_id}/stream")).await;
    assert!(stream.text().contains("event: error"));
}

#[test]
fn citeflow_errors_map_to_http_statuses() {
    use citeflow_gui::error::AppError;

    let rate_limited = AppError::from(CiteflowError::RateLimited {
        service: "linkup".into(),
    });
    assert_eq!(rate_limited.status(), 429);
    let no_results = AppError::from(CiteflowError::NoResults { query: "q".into() });
    assert_eq!(no_results.status(), 404);
}
