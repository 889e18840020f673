use anyhow::{Context, Result};
use axum::Router;
use citeflow_core::{ConfigLoader, ResearchToolkit};
use citeflow_gui::config::AppConfig;
use citeflow_gui::routes::build_router;
use citeflow_gui::state::AppState;
use citeflow_gui::telemetry::init_tracing;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let core_config = ConfigLoader::load(config.core_config.clone())?;
    init_tracing(&config, &core_config.logging.level)?;

    let toolkit = ResearchToolkit::from_config(&core_config).context("failed to configure research services")?;
    let state = AppState::new(toolkit, &config);
    if config.auth_token.is_none() && !config.listen_addr.starts_with("127.0.0.1") {
        warn!(address = %config.listen_addr, "listening beyond localhost without CITEFLOW_GUI_AUTH_TOKEN");
    }

    let app: Router = build_router(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(
        address = %config.listen_addr,
        max_concurrency = config.max_concurrency,
        "citeflow-gui listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            stream.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
