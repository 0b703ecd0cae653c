use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;

use crate::credentials::Provider;

const EXCERPT_MAX_CHARS: usize = 200;

fn auth_regex() -> Result<&'static Regex, regex::Error> {
    static AUTH_RE: OnceCell<Regex> = OnceCell::new();
    AUTH_RE.get_or_try_init(|| {
        Regex::new(r"(?i)\b401\b|unauthori[sz]ed|invalid api key|api key missing")
    })
}

fn quota_regex() -> Result<&'static Regex, regex::Error> {
    static QUOTA_RE: OnceCell<Regex> = OnceCell::new();
    QUOTA_RE.get_or_try_init(|| Regex::new(r"(?i)budget|credit|funds|quota"))
}

fn regex_hit(re: Result<&'static Regex, regex::Error>, text: &str) -> bool {
    re.map(|re| re.is_match(text)).unwrap_or(false)
}

/// Failure reported by a provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} rejected the credential: {message}")]
    Auth { provider: Provider, message: String },

    #[error("{provider} quota or credit exhausted: {message}")]
    Quota { provider: Provider, message: String },

    #[error("{provider} refused the prompt (content policy): {message}")]
    ContentPolicy { provider: Provider, message: String },

    #[error("{provider} returned an unparseable payload: {excerpt}")]
    Parse { provider: Provider, excerpt: String },

    #[error("{provider} request failed: {message}")]
    Network { provider: Provider, message: String },

    #[error("{provider} job did not finish after {attempts} polls")]
    Timeout { provider: Provider, attempts: u32 },

    #[error("no {0} credential configured")]
    MissingCredential(Provider),
}

impl ProviderError {
    /// Classifies a non-success HTTP response.
    pub fn classify(provider: Provider, status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, excerpt(body))
        };

        match status {
            401 | 403 => Self::Auth { provider, message },
            402 | 429 => Self::Quota { provider, message },
            _ => Self::from_message(provider, message),
        }
    }

    /// Classifies a free-text vendor failure by its wording.
    pub fn from_message(provider: Provider, message: impl Into<String>) -> Self {
        let message = message.into();
        if regex_hit(auth_regex(), &message) {
            Self::Auth { provider, message }
        } else if regex_hit(quota_regex(), &message) {
            Self::Quota { provider, message }
        } else {
            Self::Network { provider, message }
        }
    }

    pub fn parse(provider: Provider, raw: &str) -> Self {
        Self::Parse {
            provider,
            excerpt: excerpt(raw),
        }
    }

    pub fn network(provider: Provider, err: &reqwest::Error) -> Self {
        Self::Network {
            provider,
            message: err.to_string(),
        }
    }

    /// Credential and credit failures end the current bulk pass.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Quota { .. } | Self::MissingCredential(_)
        )
    }

    pub fn provider(&self) -> Provider {
        match self {
            Self::Auth { provider, .. }
            | Self::Quota { provider, .. }
            | Self::ContentPolicy { provider, .. }
            | Self::Parse { provider, .. }
            | Self::Network { provider, .. }
            | Self::Timeout { provider, .. } => *provider,
            Self::MissingCredential(provider) => *provider,
        }
    }
}

/// Persistence failure. Logged, never surfaced to the generation workflow.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Rejected scene collection operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    #[error("scene collection is busy with a generation pass")]
    Busy,

    #[error("scene index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("scene {0} is already generating")]
    SceneLoading(usize),

    #[error("scene {0} changed voice while its narration was generating")]
    VoiceChanged(usize),
}

pub(crate) fn excerpt(raw: &str) -> String {
    let mut out: String = raw.chars().take(EXCERPT_MAX_CHARS).collect();
    if raw.chars().count() > EXCERPT_MAX_CHARS {
        out.push_str("...");
    }
    out
}
