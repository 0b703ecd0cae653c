//! AI33 speech: submit a TTS task, then poll the task endpoint until the
//! audio URL is ready.

use super::{poll_until_ready, require_key, PollStatus, SpeechProvider, Voice};
use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const AI33_BASE: &str = "https://api.ai33.pro/v1m";
const POLL_ATTEMPTS: u32 = 120;
const POLL_DELAY: Duration = Duration::from_secs(2);

pub struct Ai33Speech {
    client: Client,
    poll_attempts: u32,
    poll_delay: Duration,
}

impl Ai33Speech {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_attempts: POLL_ATTEMPTS,
            poll_delay: POLL_DELAY,
        }
    }

    pub fn with_polling(mut self, attempts: u32, delay: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_delay = delay;
        self
    }

    async fn check_task(&self, task_id: &str, key: &str) -> PollStatus {
        let resp = match self
            .client
            .get(format!("{AI33_BASE}/task/{task_id}"))
            .header("xi-api-key", key)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(30))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!("AI33 poll HTTP {} (retrying)", resp.status().as_u16());
                return PollStatus::Pending;
            }
            Err(e) => {
                warn!("AI33 poll error (retrying): {e}");
                return PollStatus::Pending;
            }
        };

        match resp.json::<Value>().await {
            Ok(data) => task_status(&data),
            Err(_) => PollStatus::Pending,
        }
    }
}

fn str_at<'a>(data: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| {
        let mut cur = data;
        for key in *path {
            cur = cur.get(key)?;
        }
        match cur {
            Value::String(s) if !s.is_empty() => Some(s.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    })
}

fn audio_url(data: &Value) -> Option<String> {
    str_at(
        data,
        &[
            &["metadata", "audio_url"],
            &["data", "metadata", "audio_url"],
            &["data", "url"],
            &["url"],
        ],
    )
    .map(str::to_string)
}

fn task_id(data: &Value) -> Option<String> {
    str_at(data, &[&["task_id"], &["id"], &["data", "task_id"], &["data", "id"]])
        .map(str::to_string)
}

/// Clone list payload: `{"success": true, "data": [...]}`. Any other shape
/// is read as an empty list.
fn voice_list(data: Value) -> Vec<Voice> {
    let ok = data.get("success").and_then(Value::as_bool).unwrap_or(false);
    match data.get("data").filter(|items| ok && items.is_array()) {
        Some(items) => {
            serde_json::from_value(items.clone()).unwrap_or_else(|e| {
                warn!("unexpected AI33 voice entry: {e}");
                Vec::new()
            })
        }
        _ => {
            warn!("unexpected AI33 voice list format");
            Vec::new()
        }
    }
}

fn task_status(data: &Value) -> PollStatus {
    let status = str_at(data, &[&["status"], &["data", "status"]]).unwrap_or("processing");
    match status {
        "success" | "done" => match audio_url(data) {
            Some(url) => PollStatus::Ready(url),
            None => PollStatus::Pending,
        },
        "error" | "failed" => PollStatus::Failed(
            str_at(data, &[&["error_message"], &["data", "error_message"]])
                .unwrap_or("task failed during polling")
                .to_string(),
        ),
        _ => PollStatus::Pending,
    }
}

#[async_trait]
impl SpeechProvider for Ai33Speech {
    fn provider(&self) -> Provider {
        Provider::Ai33
    }

    async fn list_voices(&self, credentials: &CredentialSet) -> Result<Vec<Voice>, ProviderError> {
        let key = require_key(credentials, Provider::Ai33)?;
        let resp = self
            .client
            .get(format!("{AI33_BASE}/voice/clone"))
            .header("xi-api-key", key)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Ai33, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::classify(Provider::Ai33, status.as_u16(), &raw));
        }
        let data: Value =
            serde_json::from_str(&raw).map_err(|_| ProviderError::parse(Provider::Ai33, &raw))?;
        Ok(voice_list(data))
    }

    async fn generate_speech(
        &self,
        text: &str,
        voice_id: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let key = require_key(credentials, Provider::Ai33)?;
        let payload = json!({
            "text": text,
            "model": "speech-2.6-hd",
            "voice_setting": {"voice_id": voice_id, "vol": 1, "pitch": 0, "speed": 1.15},
            "language_boost": "Auto",
        });

        let resp = self
            .client
            .post(format!("{AI33_BASE}/task/text-to-speech"))
            .header("xi-api-key", key)
            .header("Accept", "application/json")
            .json(&payload)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Ai33, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::classify(Provider::Ai33, status.as_u16(), &raw));
        }

        let data: Value =
            serde_json::from_str(&raw).map_err(|_| ProviderError::parse(Provider::Ai33, &raw))?;

        if let Some(url) = audio_url(&data) {
            return Ok(url);
        }

        let Some(task_id) = task_id(&data) else {
            return Err(ProviderError::parse(Provider::Ai33, &raw));
        };
        if let PollStatus::Failed(message) = task_status(&data) {
            return Err(ProviderError::from_message(Provider::Ai33, message));
        }

        debug!("AI33 task {task_id} accepted, polling");
        poll_until_ready(Provider::Ai33, self.poll_attempts, self.poll_delay, |_| {
            self.check_task(&task_id, key)
        })
        .await
    }
}
