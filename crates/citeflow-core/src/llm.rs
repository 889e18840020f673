//! Chat-completion clients for the supported LLM backends.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::{LlmConfig, LlmProvider};
use crate::{CiteflowError, Result, SecretValue, require_env};

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send one system + user exchange and return the assistant text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Sampling settings shared by all backends.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&LlmConfig> for GenerationSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Build the client selected by the configuration. Requires the API key variable.
pub fn build_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let api_key = require_env(&config.api_key_env())?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("citeflow/", env!("CARGO_PKG_VERSION")))
        .timeout(config.timeout())
        .build()
        .map_err(|err| CiteflowError::InvalidConfiguration(format!("http client: {err}")))?;
    let settings = GenerationSettings::from(config);

    let model: Arc<dyn LanguageModel> = match config.provider() {
        LlmProvider::OpenAi => Arc::new(OpenAiClient::new(
            http,
            config.base_url(),
            config.model(),
            api_key,
            settings,
        )),
        LlmProvider::Gemini => Arc::new(GeminiClient::new(
            http,
            config.base_url(),
            config.model(),
            api_key,
            settings,
        )),
    };
    Ok(model)
}

fn empty_completion(service: &str) -> CiteflowError {
    CiteflowError::api(service, "model returned an empty completion", true)
}

/// OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
    settings: GenerationSettings,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretValue,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            settings,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(name = "llm.openai", skip_all, fields(model = %self.model))]
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|err| CiteflowError::transport("openai", err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CiteflowError::from_status("openai", status.as_u16(), &body));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| CiteflowError::transport("openai", err))?;

        let text = payload
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| empty_completion("openai"))?;

        debug!(chars = text.len(), "openai completion received");
        Ok(text)
    }
}

/// Gemini `models/{model}:generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
    settings: GenerationSettings,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretValue,
        settings: GenerationSettings,
    ) -> Self {
        let model = model.into();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.trim_start_matches("gemini/").to_string(),
            api_key,
            settings,
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(name = "llm.gemini", skip_all, fields(model = %self.model))]
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.settings.temperature,
                "maxOutputTokens": self.settings.max_tokens,
            }
        });

        let response = self
            .http
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| CiteflowError::transport("gemini", err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CiteflowError::from_status("gemini", status.as_u16(), &body));
        }

        let payload: GeminiResponse = response
            .json()
            .await
            .map_err(|err| CiteflowError::transport("gemini", err))?;

        let text: String = payload
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .next()
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(empty_completion("gemini"));
        }

        debug!(chars = text.len(), "gemini completion received");
        Ok(text)
    }
}
