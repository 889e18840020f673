use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrency: usize,
    /// Serve static files from here instead of the built-in page.
    pub assets_dir: Option<PathBuf>,
    pub auth_token: Option<String>,
    /// Path handed to the core config loader.
    pub core_config: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::DEFAULT_LISTEN_ADDR.to_string(),
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            assets_dir: None,
            auth_token: None,
            core_config: None,
            otel_endpoint: None,
        }
    }
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "127.0.0.1:8080";
    const DEFAULT_MAX_CONCURRENCY: usize = 2;

    pub fn from_env() -> Result<Self> {
        let listen_addr = non_empty("CITEFLOW_GUI_LISTEN_ADDR")
            .unwrap_or_else(|| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = match non_empty("CITEFLOW_GUI_MAX_CONCURRENCY") {
            Some(value) => value
                .parse::<usize>()
                .ok()
                .filter(|value| *value > 0)
                .with_context(|| "CITEFLOW_GUI_MAX_CONCURRENCY must be a positive integer")?,
            None => Self::DEFAULT_MAX_CONCURRENCY,
        };

        let assets_dir = non_empty("CITEFLOW_GUI_ASSETS_DIR").map(|dir| {
            let path = PathBuf::from(dir);
            if path.is_relative() {
                env::current_dir().map(|cwd| cwd.join(&path)).unwrap_or(path)
            } else {
                path
            }
        });

        Ok(Self {
            listen_addr,
            max_concurrency,
            assets_dir,
            auth_token: non_empty("CITEFLOW_GUI_AUTH_TOKEN"),
            core_config: non_empty("CITEFLOW_CONFIG").map(PathBuf::from),
            otel_endpoint: non_empty("CITEFLOW_GUI_OTEL_ENDPOINT"),
        })
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
