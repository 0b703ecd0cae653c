use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentMode {
    Real,
    Fake,
}

impl fmt::Display for ContentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentMode::Real => f.write_str("REAL"),
            ContentMode::Fake => f.write_str("FAKE"),
        }
    }
}

impl FromStr for ContentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REAL" => Ok(ContentMode::Real),
            "FAKE" => Ok(ContentMode::Fake),
            other => Err(format!("unknown content mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            other => Err(format!("unsupported aspect ratio: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImpactLevel {
    Low,
    #[default]
    Medium,
    High,
    Viral,
    Catastrophic,
}

impl ImpactLevel {
    /// Lenient mapping for model output; unknown labels become `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "low" | "bajo" => ImpactLevel::Low,
            "high" | "alto" => ImpactLevel::High,
            "viral" => ImpactLevel::Viral,
            "catastrophic" | "cataclísmico" | "cataclismico" => ImpactLevel::Catastrophic,
            _ => ImpactLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub data_uri: String,
    pub aspect_ratio: AspectRatio,
}

/// One storyboard unit.
///
/// `content_mode` and `selected_voice_id` have no public setters: the mode is
/// fixed at creation and voice changes go through [`Scene::select_voice`],
/// which drops narration audio recorded with the previous voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub headline: String,
    pub narration_text: String,
    pub image_prompt: String,
    pub impact_level: ImpactLevel,
    pub category: String,
    pub hashtag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected_voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_audio: Option<String>,
    content_mode: ContentMode,
}

impl Scene {
    pub fn new(
        headline: impl Into<String>,
        narration_text: impl Into<String>,
        image_prompt: impl Into<String>,
        content_mode: ContentMode,
    ) -> Self {
        Self {
            headline: headline.into(),
            narration_text: narration_text.into(),
            image_prompt: image_prompt.into(),
            impact_level: ImpactLevel::default(),
            category: String::new(),
            hashtag: String::new(),
            generated_image: None,
            selected_voice_id: None,
            generated_audio: None,
            content_mode,
        }
    }

    pub fn with_details(
        mut self,
        impact_level: ImpactLevel,
        category: impl Into<String>,
        hashtag: impl Into<String>,
    ) -> Self {
        self.impact_level = impact_level;
        self.category = category.into();
        self.hashtag = hashtag.into();
        self
    }

    pub fn content_mode(&self) -> ContentMode {
        self.content_mode
    }

    pub fn selected_voice_id(&self) -> Option<&str> {
        self.selected_voice_id.as_deref()
    }

    /// Sets the narration voice. Any previously generated audio is dropped
    /// when the voice actually changes.
    pub fn select_voice(&mut self, voice_id: Option<String>) {
        if self.selected_voice_id != voice_id {
            self.generated_audio = None;
        }
        self.selected_voice_id = voice_id;
    }

    /// Image prompt, or headline plus narration when the prompt is blank.
    pub fn effective_image_prompt(&self) -> String {
        if self.image_prompt.trim().is_empty() {
            format!("{}. {}", self.headline, self.narration_text)
        } else {
            self.image_prompt.clone()
        }
    }

    pub fn has_current_image(&self, global: AspectRatio) -> bool {
        self.generated_image
            .as_ref()
            .is_some_and(|img| img.aspect_ratio == global)
    }

    pub fn needs_audio(&self) -> bool {
        self.selected_voice_id.is_some() && self.generated_audio.is_none()
    }
}
