use crate::storage::LocalStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Vendors whose secrets the store can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Openai,
    Anthropic,
    Gemini,
    Reve,
    Elevenlabs,
    Ai33,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::Openai,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::Reve,
        Provider::Elevenlabs,
        Provider::Ai33,
    ];

    pub fn key_name(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Reve => "reve",
            Provider::Elevenlabs => "elevenlabs",
            Provider::Ai33 => "ai33",
        }
    }

    fn storage_key(&self) -> String {
        format!("credentials/{}.key", self.key_name())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.key_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

/// One opaque secret per provider. No cross-validation between providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    keys: BTreeMap<Provider, String>,
}

impl CredentialSet {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn has(&self, provider: Provider) -> bool {
        self.get(provider).is_some()
    }

    pub fn with(mut self, provider: Provider, secret: impl Into<String>) -> Self {
        self.insert(provider, secret);
        self
    }

    fn insert(&mut self, provider: Provider, secret: impl Into<String>) {
        let secret = secret.into();
        let secret = secret.trim();
        if secret.is_empty() {
            self.keys.remove(&provider);
        } else {
            self.keys.insert(provider, secret.to_string());
        }
    }
}

/// Redacted preview of a secret for display and logs.
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 12 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

pub struct CredentialStore {
    store: LocalStore,
    current: CredentialSet,
}

impl CredentialStore {
    /// Reads every provider entry; unreadable entries count as absent.
    pub async fn load(store: LocalStore) -> Self {
        let mut current = CredentialSet::default();
        for provider in Provider::ALL {
            match store.read_text(&provider.storage_key()).await {
                Ok(Some(secret)) => current.insert(provider, secret),
                Ok(None) => {}
                Err(e) => warn!("failed to read {provider} credential: {e}"),
            }
        }
        debug!(
            "loaded credentials for {} provider(s)",
            Provider::ALL.iter().filter(|p| current.has(**p)).count()
        );
        Self { store, current }
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.current
    }

    /// Stores or replaces a secret. An empty value clears the entry.
    pub async fn set(&mut self, provider: Provider, secret: &str) {
        self.current.insert(provider, secret);
        let result = match self.current.get(provider) {
            Some(value) => self.store.write_text(&provider.storage_key(), value).await,
            None => self.store.remove(&provider.storage_key()).await,
        };
        if let Err(e) = result {
            warn!("failed to persist {provider} credential: {e}");
        }
    }

    pub async fn clear(&mut self, provider: Provider) {
        self.set(provider, "").await;
    }
}
