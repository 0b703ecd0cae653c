use super::{require_key, ImageProvider};
use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use crate::scene::AspectRatio;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REVE_CREATE_URL: &str = "https://api.reve.com/v1/image/create";
const STYLE_PREFIX: &str = "Cinematic, hyper-realistic, 8k resolution.";

#[derive(Debug, Deserialize)]
struct ReveImageResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    content_violation: bool,
}

/// Adds the house style unless the prompt already asks for it.
fn styled_prompt(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    if lower.contains("cinematic") || lower.contains("8k") {
        prompt.to_string()
    } else {
        format!("{STYLE_PREFIX} {prompt}")
    }
}

/// Pulls the most useful message out of a Reve error body.
fn reve_error_message(status: u16, text: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return if text.trim().is_empty() {
            format!("Error {status}")
        } else {
            text.to_string()
        };
    };

    if let Some(msg) = value.get("message").and_then(|v| v.as_str()) {
        return msg.to_string();
    }
    match value.get("error") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => text.to_string(),
    }
}

fn image_data_uri(resp_json: &str) -> Result<String, ProviderError> {
    let parsed: ReveImageResponse = serde_json::from_str(resp_json)
        .map_err(|_| ProviderError::parse(Provider::Reve, resp_json))?;
    if parsed.content_violation {
        return Err(ProviderError::ContentPolicy {
            provider: Provider::Reve,
            message: "image blocked by content policy".to_string(),
        });
    }
    match parsed.image {
        Some(b64) if !b64.is_empty() => Ok(format!("data:image/png;base64,{b64}")),
        _ => Err(ProviderError::parse(Provider::Reve, resp_json)),
    }
}

pub struct ReveImage {
    client: Client,
}

impl ReveImage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageProvider for ReveImage {
    fn provider(&self) -> Provider {
        Provider::Reve
    }

    async fn generate_image(
        &self,
        prompt: &str,
        credentials: &CredentialSet,
        aspect_ratio: AspectRatio,
    ) -> Result<String, ProviderError> {
        let key = require_key(credentials, Provider::Reve)?;
        let body = json!({
            "prompt": styled_prompt(prompt),
            "aspect_ratio": aspect_ratio.as_str(),
            "version": "latest",
        });

        let resp = self
            .client
            .post(REVE_CREATE_URL)
            .bearer_auth(key)
            .header("Accept", "application/json")
            .json(&body)
            .timeout(Duration::from_secs(180))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Reve, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = reve_error_message(status.as_u16(), &raw);
            return Err(ProviderError::classify(Provider::Reve, status.as_u16(), &message));
        }

        image_data_uri(&raw)
    }
}
