//! Provider adapters. Each vendor is a thin request/response client behind
//! one of the traits below; the orchestrator only sees the traits.

use crate::credentials::{CredentialSet, Provider};
use crate::error::ProviderError;
use crate::scene::{AspectRatio, ContentMode, ImpactLevel, Scene};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub mod ai33;
pub mod anthropic;
pub mod elevenlabs;
pub mod gemini;
pub mod openai;
pub mod reve;

pub const MIN_PARSED_SCENES: usize = 1;
pub const MAX_PARSED_SCENES: usize = 40;

#[async_trait]
pub trait ScriptProvider: Send + Sync {
    fn provider(&self) -> Provider;

    async fn generate_script(
        &self,
        topic: &str,
        mode: ContentMode,
        credentials: &CredentialSet,
        max_chars: usize,
    ) -> Result<Vec<Scene>, ProviderError>;

    /// Splits a user-written script into `scene_count` scenes.
    async fn parse_script(
        &self,
        script: &str,
        scene_count: usize,
        mode: ContentMode,
        credentials: &CredentialSet,
    ) -> Result<Vec<Scene>, ProviderError>;

    /// Rewrites one image prompt into a more detailed English prompt.
    /// `context` is the scene's headline and narration.
    async fn regenerate_image_prompt(
        &self,
        current_prompt: &str,
        context: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Returns the image as a `data:` URI.
    async fn generate_image(
        &self,
        prompt: &str,
        credentials: &CredentialSet,
        aspect_ratio: AspectRatio,
    ) -> Result<String, ProviderError>;
}

/// A selectable narration voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    #[serde(alias = "name")]
    pub voice_name: String,
    #[serde(default, alias = "preview_url", skip_serializing_if = "Option::is_none")]
    pub sample_audio: Option<String>,
    #[serde(default)]
    pub tag_list: Vec<String>,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Voices the account can narrate with.
    async fn list_voices(&self, credentials: &CredentialSet) -> Result<Vec<Voice>, ProviderError>;

    /// Returns a URI (remote URL or `data:` URI) for the narration audio.
    async fn generate_speech(
        &self,
        text: &str,
        voice_id: &str,
        credentials: &CredentialSet,
    ) -> Result<String, ProviderError>;
}

pub(crate) fn require_key(
    credentials: &CredentialSet,
    provider: Provider,
) -> Result<&str, ProviderError> {
    credentials
        .get(provider)
        .ok_or(ProviderError::MissingCredential(provider))
}

pub(crate) fn trim_copy_utf8_safe(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }

    let mut cut = max_bytes.min(input.len());
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input[..cut].to_string()
}

pub(crate) fn script_prompt(topic: &str, mode: ContentMode, max_chars: usize) -> String {
    let tone = match mode {
        ContentMode::Real => "serious, urgent broadcast journalism grounded in verifiable facts",
        ContentMode::Fake => "viral conspiracy-show storytelling, dramatic and speculative",
    };
    format!(
        "Topic: \"{topic}\".\nWrite exactly 3 continuous news scenes in a {tone} tone.\n\
         Each narration ('summary') must be about {max_chars} characters.\n\
         Return STRICT JSON only: {{\"scenes\":[{{\"headline\":\"...\",\"summary\":\"...\",\
         \"imagePrompt\":\"...\",\"impactLevel\":\"Low|Medium|High|Viral|Catastrophic\",\
         \"category\":\"...\",\"hashtag\":\"#...\"}}]}}"
    )
}

pub(crate) fn parse_prompt(script: &str, scene_count: usize, mode: ContentMode) -> String {
    format!(
        "Split the following script into exactly {scene_count} sequential scenes ({mode} style).\n\
         Keep the original wording in 'summary' and write a cinematic English 'imagePrompt' for each.\n\
         Return STRICT JSON only with the shape {{\"scenes\":[{{\"headline\":\"...\",\"summary\":\"...\",\
         \"imagePrompt\":\"...\",\"impactLevel\":\"...\",\"category\":\"...\",\"hashtag\":\"...\"}}]}}\n\n\
         SCRIPT:\n{script}"
    )
}

pub(crate) fn refine_prompt(current_prompt: &str, context: &str) -> String {
    format!(
        "You write detailed visual prompts for image generation.\n\
         Current image prompt: \"{current_prompt}\"\n\
         Scene context: \"{context}\"\n\
         Rewrite the prompt so the image is more striking. Write it in English, \
         describe style, lighting and composition, use terms such as photorealistic, \
         cinematic, dramatic lighting, 4k, highly detailed, keep the essence of the \
         original and stay under 200 words.\n\
         Return ONLY the new prompt, with no explanation."
    )
}

/// Cleans a rewritten prompt: fences, surrounding quotes and whitespace go.
pub(crate) fn refined_prompt_text(provider: Provider, text: &str) -> Result<String, ProviderError> {
    let cleaned = text
        .trim()
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .trim_matches('"')
        .trim();
    if cleaned.is_empty() {
        return Err(ProviderError::parse(provider, text));
    }
    Ok(cleaned.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneDraft {
    #[serde(default)]
    headline: String,
    #[serde(default, alias = "narration", alias = "narrationText")]
    summary: String,
    #[serde(default, alias = "image_prompt")]
    image_prompt: String,
    #[serde(default, alias = "impact_level")]
    impact_level: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    hashtag: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SceneEnvelope {
    Wrapped {
        #[serde(alias = "items", alias = "news")]
        scenes: Vec<SceneDraft>,
    },
    Bare(Vec<SceneDraft>),
}

/// Parses model output into scenes. Accepts a bare array or `{"scenes": [...]}`,
/// optionally wrapped in a markdown code fence.
pub(crate) fn parse_scene_payload(
    provider: Provider,
    text: &str,
    mode: ContentMode,
) -> Result<Vec<Scene>, ProviderError> {
    let json_text = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let drafts = match serde_json::from_str::<SceneEnvelope>(json_text) {
        Ok(SceneEnvelope::Wrapped { scenes }) | Ok(SceneEnvelope::Bare(scenes)) => scenes,
        Err(_) => return Err(ProviderError::parse(provider, text)),
    };

    let scenes: Vec<Scene> = drafts
        .into_iter()
        .filter(|d| !d.headline.trim().is_empty() || !d.summary.trim().is_empty())
        .map(|d| {
            Scene::new(d.headline, d.summary, d.image_prompt, mode).with_details(
                ImpactLevel::from_label(&d.impact_level),
                d.category,
                d.hashtag,
            )
        })
        .collect();

    if scenes.is_empty() {
        return Err(ProviderError::parse(provider, text));
    }
    Ok(scenes)
}

pub(crate) fn check_scene_count(scene_count: usize) -> Result<(), String> {
    if (MIN_PARSED_SCENES..=MAX_PARSED_SCENES).contains(&scene_count) {
        Ok(())
    } else {
        Err(format!(
            "scene count must be between {MIN_PARSED_SCENES} and {MAX_PARSED_SCENES}, got {scene_count}"
        ))
    }
}

/// Result of one status check on an asynchronous vendor job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Ready(String),
    Failed(String),
}

/// Polls `check` up to `max_attempts` times, sleeping `delay` before each
/// check. A vendor-reported failure ends the loop immediately; running out of
/// attempts is a [`ProviderError::Timeout`].
pub async fn poll_until_ready<F, Fut>(
    provider: Provider,
    max_attempts: u32,
    delay: Duration,
    mut check: F,
) -> Result<String, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollStatus>,
{
    for attempt in 0..max_attempts {
        tokio::time::sleep(delay).await;
        match check(attempt).await {
            PollStatus::Ready(url) => return Ok(url),
            PollStatus::Failed(message) => {
                return Err(ProviderError::from_message(provider, message));
            }
            PollStatus::Pending => {}
        }
    }
    Err(ProviderError::Timeout {
        provider,
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_fenced_payloads() {
        let text = "```json\n{\"scenes\":[{\"headline\":\"A\",\"summary\":\"s\",\"imagePrompt\":\"p\",\"impactLevel\":\"Viral\",\"category\":\"c\",\"hashtag\":\"#a\"}]}\n```";
        let scenes = parse_scene_payload(Provider::Gemini, text, ContentMode::Real).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].headline, "A");
        assert_eq!(scenes[0].narration_text, "s");
        assert_eq!(scenes[0].impact_level, ImpactLevel::Viral);
        assert_eq!(scenes[0].content_mode(), ContentMode::Real);
    }

    #[test]
    fn parses_bare_array_with_aliases() {
        let text = r#"[{"headline":"B","narration":"n","image_prompt":"ip"}]"#;
        let scenes = parse_scene_payload(Provider::Openai, text, ContentMode::Fake).unwrap();
        assert_eq!(scenes[0].narration_text, "n");
        assert_eq!(scenes[0].image_prompt, "ip");
    }

    #[test]
    fn garbage_payload_is_parse_error() {
        let err = parse_scene_payload(Provider::Openai, "sorry, I can't", ContentMode::Fake)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }));
        let err = parse_scene_payload(Provider::Openai, "[]", ContentMode::Fake).unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }));
    }

    #[test]
    fn refined_prompt_is_unquoted() {
        assert_eq!(
            refined_prompt_text(Provider::Gemini, "  \"A lava river at night, 4k\"\n").unwrap(),
            "A lava river at night, 4k"
        );
        assert!(matches!(
            refined_prompt_text(Provider::Gemini, " \"\" "),
            Err(ProviderError::Parse { .. })
        ));
    }

    #[test]
    fn voices_accept_both_vendor_shapes() {
        let ai33: Voice = serde_json::from_str(
            r#"{"voice_id":"v1","voice_name":"Ana","sample_audio":"https://cdn/a.mp3","tag_list":["es"]}"#,
        )
        .unwrap();
        assert_eq!(ai33.voice_name, "Ana");
        assert_eq!(ai33.tag_list, vec!["es"]);

        let eleven: Voice =
            serde_json::from_str(r#"{"voice_id":"v2","name":"Rachel","preview_url":"https://x"}"#)
                .unwrap();
        assert_eq!(eleven.voice_name, "Rachel");
        assert_eq!(eleven.sample_audio.as_deref(), Some("https://x"));
    }

    #[test]
    fn scene_count_bounds() {
        assert!(check_scene_count(0).is_err());
        assert!(check_scene_count(1).is_ok());
        assert!(check_scene_count(40).is_ok());
        assert!(check_scene_count(41).is_err());
    }

    #[test]
    fn utf8_trim_respects_char_boundaries() {
        assert_eq!(trim_copy_utf8_safe("héllo", 2), "h");
        assert_eq!(trim_copy_utf8_safe("abc", 10), "abc");
    }

    #[tokio::test]
    async fn poll_returns_when_ready() {
        let url = poll_until_ready(Provider::Ai33, 5, Duration::from_millis(1), |attempt| async move {
            if attempt < 2 {
                PollStatus::Pending
            } else {
                PollStatus::Ready("https://cdn/a.mp3".into())
            }
        })
        .await
        .unwrap();
        assert_eq!(url, "https://cdn/a.mp3");
    }

    #[tokio::test]
    async fn poll_exhaustion_is_timeout_not_failure() {
        let err = poll_until_ready(Provider::Ai33, 3, Duration::from_millis(1), |_| async {
            PollStatus::Pending
        })
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Timeout {
                provider: Provider::Ai33,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn vendor_failure_stops_polling() {
        let mut calls = 0;
        let err = poll_until_ready(Provider::Ai33, 10, Duration::from_millis(1), |_| {
            calls += 1;
            async { PollStatus::Failed("synthesis failed".into()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, ProviderError::Network { .. }));
    }
}
