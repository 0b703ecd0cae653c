use super::{require_key, SpeechProvider, Voice};
use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use crate::logw;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;

const VOICES_URL: &str = "https://api.elevenlabs.io/v1/voices";

#[derive(Debug, Deserialize)]
struct VoiceList {
    #[serde(default)]
    voices: Vec<Voice>,
}

pub struct ElevenLabsSpeech {
    client: Client,
    model_id: String,
}

impl ElevenLabsSpeech {
    pub fn new(client: Client, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
        }
    }
}

fn mp3_data_uri(bytes: &[u8]) -> String {
    format!("data:audio/mpeg;base64,{}", BASE64.encode(bytes))
}

#[async_trait]
impl SpeechProvider for ElevenLabsSpeech {
    fn provider(&self) -> Provider {
        Provider::Elevenlabs
    }

    async fn list_voices(&self, credentials: &CredentialSet) -> Result<Vec<Voice>, ProviderError> {
        let key = require_key(credentials, Provider::Elevenlabs)?;
        let resp = self
            .client
            .get(VOICES_URL)
            .header("xi-api-key", key)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Elevenlabs, &e))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::classify(Provider::Elevenlabs, status.as_u16(), &raw));
        }
        serde_json::from_str::<VoiceList>(&raw)
            .map(|list| list.voices)
            .map_err(|_| ProviderError::parse(Provider::Elevenlabs, &raw))
    }

    async fn generate_speech(
        &self,
        text: &str,
        voice_id: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError> {
        let key = require_key(credentials, Provider::Elevenlabs)?;
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
            voice_id
        );

        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
        });

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("xi-api-key", key)
            .json(&body)
            .timeout(std::time::Duration::from_secs(300))
            .send()
            .await
            .map_err(|e| ProviderError::network(Provider::Elevenlabs, &e))?;

        let status = resp.status();
        if !status.is_success() {
            logw(format!("ElevenLabs TTS failed HTTP {}", status.as_u16()));
            let raw = resp.text().await.unwrap_or_default();
            return Err(ProviderError::classify(Provider::Elevenlabs, status.as_u16(), &raw));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::network(Provider::Elevenlabs, &e))?;
        if bytes.is_empty() {
            return Err(ProviderError::parse(Provider::Elevenlabs, "empty audio body"));
        }

        Ok(mp3_data_uri(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_bytes_become_data_uri() {
        assert_eq!(mp3_data_uri(b"ID3"), "data:audio/mpeg;base64,SUQz");
    }

    #[test]
    fn voice_list_reads_names_and_previews() {
        let raw = r#"{"voices":[{"voice_id":"21m00","name":"Rachel","preview_url":"https://p/r.mp3","labels":{"accent":"american"}}]}"#;
        let list: VoiceList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.voices.len(), 1);
        assert_eq!(list.voices[0].voice_id, "21m00");
        assert_eq!(list.voices[0].voice_name, "Rachel");
    }
}
