use std::path::PathBuf;

use thiserror::Error;

use crate::security::redact;

/// Core error type for Citeflow.
#[derive(Debug, Error)]
pub enum CiteflowError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{service} request failed: {message}")]
    Api {
        service: String,
        status: Option<u16>,
        message: String,
        retryable: bool,
    },
    #[error("{service} rate limit reached")]
    RateLimited { service: String },
    #[error("no results found for \"{query}\"")]
    NoResults { query: String },
    #[error("render error: {0}")]
    Render(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = CiteflowError> = std::result::Result<T, E>;

impl CiteflowError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn api(service: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Api {
            service: service.into(),
            status: None,
            message: message.into(),
            retryable,
        }
    }

    /// Classify a non-success HTTP status returned by an external service.
    pub fn from_status(service: impl Into<String>, status: u16, body: &str) -> Self {
        let service = service.into();
        if status == 429 {
            return Self::RateLimited { service };
        }

        let lowered = body.to_ascii_lowercase();
        let overloaded = lowered.contains("overloaded") || lowered.contains("rate limit");
        if overloaded {
            return Self::RateLimited { service };
        }

        let snippet: String = body.chars().take(300).collect();
        Self::Api {
            service,
            status: Some(status),
            message: format!("HTTP {status}: {}", snippet.trim()),
            retryable: status >= 500 || status == 408,
        }
    }

    /// Transport-level failure (connect, timeout, decode).
    pub fn transport(service: impl Into<String>, error: reqwest::Error) -> Self {
        let retryable = error.is_timeout() || error.is_connect() || error.is_request();
        Self::Api {
            service: service.into(),
            status: error.status().map(|status| status.as_u16()),
            message: error.without_url().to_string(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::RateLimited { .. })
    }

    /// Message suitable for showing to the person who asked the question.
    pub fn user_message(&self) -> String {
        let message = match self {
            Self::RateLimited { .. } => "API rate limited: please try again later. \
                 Consider breaking your query into smaller parts."
                .to_string(),
            Self::NoResults { query } => format!(
                "No results found for \"{query}\". Try rephrasing the query or widening the focus."
            ),
            Self::MissingSecret(var) => {
                format!("Configuration error: {var} is not set. Add it to your environment or .env file.")
            }
            Self::Api { .. } => format!(
                "Research error: {self}\n\nTips:\n1. Simplify your query\n2. Check API configurations\n3. Try again later"
            ),
            other => format!("Research error: {other}"),
        };
        redact(&message)
    }
}

/// Classification of a failure recorded by a workflow task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    ExternalApi,
    NoResults,
    Internal,
}

/// Failure captured in the session context so the run can end cleanly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub kind: FailureKind,
    pub service: Option<String>,
    pub reason: String,
}

impl TaskFailure {
    pub fn from_error(task_id: impl Into<String>, error: &CiteflowError) -> Self {
        let (kind, service) = match error {
            CiteflowError::RateLimited { service } => (FailureKind::RateLimited, Some(service.clone())),
            CiteflowError::Api { service, .. } => (FailureKind::ExternalApi, Some(service.clone())),
            CiteflowError::NoResults { .. } => (FailureKind::NoResults, None),
            _ => (FailureKind::Internal, None),
        };
        Self {
            task_id: task_id.into(),
            kind,
            service,
            reason: redact(&error.to_string()),
        }
    }

    pub fn into_error(self, query: &str) -> CiteflowError {
        match self.kind {
            FailureKind::RateLimited => CiteflowError::RateLimited {
                service: self.service.unwrap_or_else(|| self.task_id.clone()),
            },
            FailureKind::ExternalApi => CiteflowError::Api {
                service: self.service.unwrap_or_else(|| self.task_id.clone()),
                status: None,
                message: self.reason,
                retryable: false,
            },
            FailureKind::NoResults => CiteflowError::NoResults {
                query: query.to_string(),
            },
            FailureKind::Internal => {
                CiteflowError::Other(anyhow::anyhow!("{} failed: {}", self.task_id, self.reason))
            }
        }
    }
}
