use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{CiteflowError, SecretValue, env_is_set, require_env};

const DEFAULT_CONFIG_PATH: &str = "citeflow.toml";
const CONFIG_PATH_ENV: &str = "CITEFLOW_CONFIG";
const PROVIDER_ENV: &str = "CITEFLOW_LLM_PROVIDER";
const MODEL_ENV: &str = "CITEFLOW_LLM_MODEL";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub academic: AcademicConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, CiteflowError> {
        require_env(&self.llm.api_key_env())
    }

    pub fn search_api_key(&self) -> Result<SecretValue, CiteflowError> {
        require_env(&self.search.api_key_env)
    }

    /// Fail early when a required secret is absent.
    pub fn validate_secrets(&self) -> Result<(), CiteflowError> {
        self.llm_api_key()?;
        self.search_api_key()?;
        Ok(())
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `CITEFLOW_CONFIG` environment variable.
    /// 3. `citeflow.toml` in the current working directory.
    /// 4. Built-in defaults.
    ///
    /// Environment overrides for the LLM backend are applied afterwards.
    pub fn load(path: Option<PathBuf>) -> Result<Config, CiteflowError> {
        let mut config = match resolve_path(path)? {
            Some(candidate) => {
                let raw = fs::read_to_string(&candidate)
                    .map_err(|err| CiteflowError::config_io(candidate.clone(), err))?;
                Self::parse(&raw)?
            }
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, CiteflowError> {
        toml::from_str(raw).map_err(|err| CiteflowError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), CiteflowError> {
        if config.search.max_searches == 0 {
            return Err(CiteflowError::InvalidConfiguration(
                "search.max_searches must be at least 1".into(),
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(CiteflowError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }
        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(CiteflowError::InvalidConfiguration(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Result<Option<PathBuf>, CiteflowError> {
    if let Some(path) = path {
        return Ok(Some(path));
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Ok(Some(PathBuf::from(from_env)));
        }
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    Ok(default.exists().then(|| default.to_path_buf()))
}

fn apply_env_overrides(config: &mut Config) -> Result<(), CiteflowError> {
    if let Ok(provider) = env::var(PROVIDER_ENV) {
        if !provider.trim().is_empty() {
            config.llm.provider = Some(provider.parse()?);
        }
    }

    if config.llm.provider.is_none() {
        let detected = if env_is_set(LlmProvider::Gemini.default_key_env()) {
            LlmProvider::Gemini
        } else {
            LlmProvider::OpenAi
        };
        config.llm.provider = Some(detected);
    }

    if let Ok(model) = env::var(MODEL_ENV) {
        if !model.trim().is_empty() {
            config.llm.model = Some(model);
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[serde(alias = "open_ai")]
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Gemini => "gemini-2.5-pro",
        }
    }

    pub fn default_key_env(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = CiteflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(LlmProvider::OpenAi),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            other => Err(CiteflowError::InvalidConfiguration(format!(
                "unknown llm provider `{other}` (expected openai or gemini)"
            ))),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::Gemini => write!(f, "gemini"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Option<LlmProvider>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key_env: None,
            base_url: None,
            temperature: 0.3,
            max_tokens: 6000,
            timeout_secs: 150,
        }
    }
}

impl LlmConfig {
    pub fn provider(&self) -> LlmProvider {
        self.provider.unwrap_or(LlmProvider::OpenAi)
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider().default_model().to_string())
    }

    pub fn api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| self.provider().default_key_env().to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider().default_base_url().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    pub base_url: String,
    pub max_searches: usize,
    pub rate_limit_ms: u64,
    pub max_result_chars: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "LINKUP_API_KEY".to_string(),
            base_url: "https://api.linkup.so/v1".to_string(),
            max_searches: 8,
            rate_limit_ms: 1500,
            max_result_chars: 5000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcademicConfig {
    pub enabled: bool,
    pub max_results: usize,
    pub providers: Vec<String>,
    /// Contact address sent to CrossRef's polite pool.
    pub mailto: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AcademicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 5,
            providers: vec![
                "arxiv".to_string(),
                "crossref".to_string(),
                "pubmed".to_string(),
                "semantic_scholar".to_string(),
            ],
            mailto: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ConfigLoader::parse(
            r#"
            [llm]
            provider = "gemini"
            temperature = 0.5

            [search]
            max_searches = 4
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.llm.provider(), LlmProvider::Gemini);
        assert_eq!(config.llm.model(), "gemini-2.5-pro");
        assert_eq!(config.llm.api_key_env(), "GEMINI_API_KEY");
        assert_eq!(config.llm.max_tokens, 6000);
        assert_eq!(config.search.max_searches, 4);
        assert_eq!(config.search.rate_limit_ms, 1500);
        assert!(config.academic.enabled);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn invalid_toml_is_configuration_error() {
        let err = ConfigLoader::parse("[llm\nprovider=").unwrap_err();
        assert!(matches!(err, CiteflowError::InvalidConfiguration(_)));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = "anthropic".parse::<LlmProvider>().unwrap_err();
        assert!(err.to_string().contains("anthropic"));
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
    }

    #[test]
    fn explicit_missing_file_reports_path() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/citeflow.toml"))).unwrap_err();
        match err {
            CiteflowError::ConfigIo { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/citeflow.toml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn explicit_file_is_loaded_and_validated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("citeflow.toml");
        std::fs::write(&path, "[search]\nmax_searches = 0\n").expect("write config");
        let err = ConfigLoader::load(Some(path)).unwrap_err();
        assert!(matches!(err, CiteflowError::InvalidConfiguration(_)));
    }
}
