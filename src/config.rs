use crate::scene::AspectRatio;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptBackend {
    Openai,
    Gemini,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechBackend {
    Elevenlabs,
    Ai33,
}

/// Application settings. API keys are never read from here; they live in the
/// credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Scenes covered by the bulk image pass.
    #[serde(default = "default_bulk_images")]
    pub bulk_images: usize,
    #[serde(default = "default_autosave")]
    pub autosave: bool,
    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,
    #[serde(default = "default_script_backend")]
    pub script_backend: ScriptBackend,
    #[serde(default = "default_speech_backend")]
    pub speech_backend: SpeechBackend,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(rename = "eleven_model_id")]
    #[serde(default = "default_model_id")]
    pub eleven_model_id: String,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("newsreel_data")
}

fn default_max_chars() -> usize {
    1050
}

fn default_bulk_images() -> usize {
    10
}

fn default_autosave() -> bool {
    true
}

fn default_autosave_debounce_ms() -> u64 {
    crate::autosave::DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_script_backend() -> ScriptBackend {
    ScriptBackend::Gemini
}

fn default_speech_backend() -> SpeechBackend {
    SpeechBackend::Ai33
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            aspect_ratio: AspectRatio::default(),
            max_chars: default_max_chars(),
            bulk_images: default_bulk_images(),
            autosave: default_autosave(),
            autosave_debounce_ms: default_autosave_debounce_ms(),
            script_backend: default_script_backend(),
            speech_backend: default_speech_backend(),
            openai_model: default_openai_model(),
            gemini_model: default_gemini_model(),
            anthropic_model: default_anthropic_model(),
            eleven_model_id: default_model_id(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        if config.max_chars == 0 {
            anyhow::bail!("config.json: max_chars must be positive");
        }

        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_ok() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"aspect_ratio":"9:16","script_backend":"openai"}"#)
            .await
            .unwrap();

        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(cfg.script_backend, ScriptBackend::Openai);
        assert_eq!(cfg.autosave_debounce_ms, 3000);
        assert!(cfg.autosave);
        assert_eq!(cfg.bulk_images, 10);
    }

    #[tokio::test]
    async fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(cfg.max_chars, 1050);
    }

    #[tokio::test]
    async fn zero_max_chars_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_chars":0}"#).await.unwrap();
        assert!(Config::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn claude_backend_is_selectable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"script_backend":"anthropic"}"#).await.unwrap();
        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.script_backend, ScriptBackend::Anthropic);
        assert_eq!(cfg.anthropic_model, "claude-sonnet-4-20250514");
    }
}
