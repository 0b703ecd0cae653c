use super::{
    check_scene_count, parse_prompt, parse_scene_payload, refine_prompt, refined_prompt_text,
    require_key, script_prompt, trim_copy_utf8_safe, ScriptProvider,
};
use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use crate::scene::{ContentMode, Scene};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_SCRIPT_CHARS: usize = 80_000;

fn gemini_extract_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;
    let parts = root
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub struct GeminiScript {
    client: Client,
    model: String,
}

impl GeminiScript {
    pub fn new(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn generate_text(
        &self,
        prompt: &str,
        json_output: bool,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let key = require_key(credentials, Provider::Gemini)?;
        let url = format!("{GEMINI_BASE}/{}:generateContent", self.model);
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });
        if json_output {
            body["generationConfig"] = json!({"responseMimeType": "application/json"});
        }

        let resp = self
            .client
            .post(url)
            .query(&[("key", key)])
            .json(&body)
            .timeout(Duration::from_secs(180))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Gemini, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!("Gemini HTTP {}", status.as_u16());
            return Err(ProviderError::classify(Provider::Gemini, status.as_u16(), &raw));
        }

        let text =
            gemini_extract_text(&raw).ok_or_else(|| ProviderError::parse(Provider::Gemini, &raw))?;
        debug!("Gemini returned {} chars", text.len());
        Ok(text)
    }

    async fn call(
        &self,
        prompt: &str,
        mode: ContentMode,
        credentials: &CredentialSet,
    ) -> Result<Vec<Scene>, ProviderError> {
        let text = self.generate_text(prompt, true, credentials).await?;
        parse_scene_payload(Provider::Gemini, &text, mode)
    }
}

#[async_trait]
impl ScriptProvider for GeminiScript {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate_script(
        &self,
        topic: &str,
        mode: ContentMode,
        credentials: &CredentialSet,
        max_chars: usize,
    ) -> Result<Vec<Scene>, ProviderError> {
        self.call(&script_prompt(topic, mode, max_chars), mode, credentials)
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
            provider: Provider::Gemini,
            excerpt: message,
        })?;
        let script = trim_copy_utf8_safe(script, MAX_SCRIPT_CHARS);
        self.call(&parse_prompt(&script, scene_count, mode), mode, credentials)
            .await
    }

    async fn regenerate_image_prompt(
        &self,
        current_prompt: &str,
        context: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let text = self
            .generate_text(&refine_prompt(current_prompt, context), false, credentials)
            .await?;
        refined_prompt_text(Provider::Gemini, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"[{\"head"},{"text":"line\":\"x\"}]"}]}}]}"#;
        assert_eq!(
            gemini_extract_text(raw).as_deref(),
            Some("[{\"headline\":\"x\"}]")
        );
    }

    #[tokio::test]
    async fn prompt_rewrite_needs_a_key() {
        let script = GeminiScript::new(Client::new(), "gemini-1.5-flash");
        let err = script
            .regenerate_image_prompt("lava", "Volcano wakes", &CredentialSet::default())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::MissingCredential(Provider::Gemini));
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(gemini_extract_text(r#"{"candidates":[]}"#).is_none());
        assert!(gemini_extract_text("not json").is_none());
    }
}
