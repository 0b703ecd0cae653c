//! Claude script generation through the Messages API.

use super::{
    check_scene_count, parse_prompt, parse_scene_payload, refine_prompt, refined_prompt_text,
    require_key, script_prompt, trim_copy_utf8_safe, ScriptProvider,
};
use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use crate::scene::{ContentMode, Scene};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8000;
const MAX_SCRIPT_CHARS: usize = 80_000;
const SCRIPT_SYSTEM: &str = "You produce high-impact viral news scripts. Answer with JSON only.";

fn claude_extract_text(resp_json: &str) -> Option<String> {
    let root: Value = serde_json::from_str(resp_json).ok()?;
    let text: String = root
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Claude tends to wrap the JSON in prose; keep the outermost array or object.
fn json_region(text: &str) -> &str {
    let start = text.find(['[', '{']);
    let end = text.rfind([']', '}']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

pub struct AnthropicScript {
    client: Client,
    model: String,
}

impl AnthropicScript {
    pub fn new(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn message(
        &self,
        system: Option<&str>,
        prompt: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let key = require_key(credentials, Provider::Anthropic)?;
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let resp = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Anthropic, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!("Claude HTTP {}", status.as_u16());
            return Err(ProviderError::classify(Provider::Anthropic, status.as_u16(), &raw));
        }

        let text = claude_extract_text(&raw)
            .ok_or_else(|| ProviderError::parse(Provider::Anthropic, &raw))?;
        debug!("Claude returned {} chars", text.len());
        Ok(text)
    }

    async fn scenes(
        &self,
        prompt: &str,
        mode: ContentMode,
        credentials: &CredentialSet,
    ) -> Result<Vec<Scene>, ProviderError> {
        let text = self.message(Some(SCRIPT_SYSTEM), prompt, credentials).await?;
        parse_scene_payload(Provider::Anthropic, json_region(&text), mode)
    }
}

#[async_trait]
impl ScriptProvider for AnthropicScript {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn generate_script(
        &self,
        topic: &str,
        mode: ContentMode,
        credentials: &CredentialSet,
        max_chars: usize,
    ) -> Result<Vec<Scene>, ProviderError> {
        self.scenes(&script_prompt(topic, mode, max_chars), mode, credentials)
            .await
    }

    async fn parse_script(
        &self,
        script: &str,
        scene_count: usize,
        mode: ContentMode,
        credentials: &CredentialSet,
    ) -> Result<Vec<Scene>, ProviderError> {
        check_scene_count(scene_count).map_err(|message| ProviderError::Parse {
            provider: Provider::Anthropic,
            excerpt: message,
        })?;
        let script = trim_copy_utf8_safe(script, MAX_SCRIPT_CHARS);
        self.scenes(&parse_prompt(&script, scene_count, mode), mode, credentials)
            .await
    }

    async fn regenerate_image_prompt(
        &self,
        current_prompt: &str,
        context: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let text = self
            .message(None, &refine_prompt(current_prompt, context), credentials)
            .await?;
        refined_prompt_text(Provider::Anthropic, &text)
    }
}
