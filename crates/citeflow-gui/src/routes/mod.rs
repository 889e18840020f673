mod health;
mod research;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use health::health_router;
use research::research_router;
use std::path::Path;
use tokio::fs::{self, canonicalize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const INDEX_HTML: &str = include_str!("../../web/index.html");

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health_router())
        .nest("/api", research_router())
        .fallback(static_fallback)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serves the query page, or files from the configured assets directory.
async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let request_path = req.uri().path().trim_start_matches('/');

    let Some(assets_dir) = state.assets_dir() else {
        return if request_path.is_empty() || request_path == "index.html" {
            Html(INDEX_HTML).into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        };
    };

    let candidate = if request_path.is_empty() {
        assets_dir.join("index.html")
    } else {
        let joined = assets_dir.join(request_path);
        if is_safe_file(assets_dir.as_ref(), &joined).await {
            joined
        } else {
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    match fs::read(&candidate).await {
        Ok(bytes) => {
            let content_type = mime_guess::from_path(&candidate).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, content_type.as_ref().to_string())],
                bytes,
            )
                .into_response()
        }
        Err(_) if request_path.is_empty() => Html(INDEX_HTML).into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Static file error: {error}"),
        )
            .into_response(),
    }
}

async fn is_safe_file(base: &Path, candidate: &Path) -> bool {
    let Ok(base) = canonicalize(base).await else {
        return false;
    };
    if let Ok(metadata) = fs::metadata(candidate).await
        && metadata.is_file()
        && let Ok(resolved) = canonicalize(candidate).await
    {
        return resolved.starts_with(base);
    }
    false
}
