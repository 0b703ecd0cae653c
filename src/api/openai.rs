use super::{
    check_scene_count, parse_prompt, parse_scene_payload, refine_prompt, refined_prompt_text,
    require_key, script_prompt, trim_copy_utf8_safe, ScriptProvider,
};
use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use crate::logw;
use crate::scene::{ContentMode, Scene};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const OPENAI_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
const MAX_SCRIPT_CHARS: usize = 80_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

fn openai_extract_output_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error").filter(|e| !e.is_null()) {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error message: {}", msg));
        }
        if let Some(code) = err.get("code").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error code: {}", code));
        }
        return None;
    }

    let output = root.get("output")?.as_array()?;
    for item in output {
        let content = item.get("content").and_then(|v| v.as_array());
        if let Some(content) = content {
            for entry in content {
                let typ = entry.get("type").and_then(|v| v.as_str());
                let text = entry.get("text").and_then(|v| v.as_str());
                if typ == Some("output_text") {
                    if let Some(text) = text {
                        return Some(text.to_string());
                    }
                }
            }
        }
    }

    None
}

pub struct OpenAiScript {
    client: Client,
    model: String,
}

impl OpenAiScript {
    pub fn new(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn request_text(
        &self,
        prompt: &str,
        json_output: bool,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let key = require_key(credentials, Provider::Openai)?;

        let body = if json_output {
            json!({
                "model": self.model,
                "input": [
                    {"role": "system", "content": "You are a helpful assistant designed to output JSON."},
                    {"role": "user", "content": prompt},
                ],
                "text": {"format": {"type": "json_object"}},
            })
        } else {
            json!({
                "model": self.model,
                "input": [{"role": "user", "content": prompt}],
            })
        };

        let resp = self
            .client
            .post(OPENAI_RESPONSES_URL)
            .bearer_auth(key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Openai, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            logw(format!("OpenAI HTTP {}", status.as_u16()));
            return Err(ProviderError::classify(Provider::Openai, status.as_u16(), &raw));
        }

        openai_extract_output_text(&raw).ok_or_else(|| ProviderError::parse(Provider::Openai, &raw))
    }

    async fn request_scenes(
        &self,
        prompt: String,
        mode: ContentMode,
        credentials: &CredentialSet,
    ) -> Result<Vec<Scene>, ProviderError> {
        let out_text = self.request_text(&prompt, true, credentials).await?;
        parse_scene_payload(Provider::Openai, &out_text, mode)
    }
}

#[async_trait]
impl ScriptProvider for OpenAiScript {
    fn provider(&self) -> Provider {
        Provider::Openai
    }

    async fn generate_script(
        &self,
        topic: &str,
        mode: ContentMode,
        credentials: &CredentialSet,
        max_chars: usize,
    ) -> Result<Vec<Scene>, ProviderError> {
        self.request_scenes(script_prompt(topic, mode, max_chars), mode, credentials)
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
            provider: Provider::Openai,
            excerpt: message,
        })?;
        let script = trim_copy_utf8_safe(script, MAX_SCRIPT_CHARS);
        self.request_scenes(parse_prompt(&script, scene_count, mode), mode, credentials)
            .await
    }

    async fn regenerate_image_prompt(
        &self,
        current_prompt: &str,
        context: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let text = self
            .request_text(&refine_prompt(current_prompt, context), false, credentials)
            .await?;
        refined_prompt_text(Provider::Openai, &text)
    }
}
