use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::CiteflowError;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)").expect("invalid api_key regex"),
        Regex::new(r"(?i)([?&]key=)([A-Za-z0-9\-_.]+)").expect("invalid key param regex"),
        Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        Regex::new(r"(sk-[A-Za-z0-9\-_]{16,})").expect("invalid sk_token regex"),
        Regex::new(r"(AIza[0-9A-Za-z\-_]{20,})").expect("invalid google key regex"),
    ]
});

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, CiteflowError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(CiteflowError::MissingSecret(var.to_string())),
    }
}

pub fn env_is_set(var: &str) -> bool {
    env::var(var)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

/// Mask credentials that may have leaked into an error or log message.
pub fn redact(input: &str) -> String {
    let mut output = input.to_string();
    for regex in REDACTION_PATTERNS.iter() {
        output = regex
            .replace_all(&output, |caps: &Captures| {
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
    }
    output
}
