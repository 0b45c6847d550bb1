use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [ImageSize::OneK, ImageSize::TwoK, ImageSize::FourK];

    /// Value sent as `imageConfig.imageSize`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(ImageSize::OneK),
            "2K" => Ok(ImageSize::TwoK),
            "4K" => Ok(ImageSize::FourK),
            other => Err(anyhow!("Unknown image size: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationSettings {
    pub image_size: ImageSize,
}

/// One frame as returned by script analysis, before it becomes a [`Scene`].
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SceneDraft {
    pub visual_description: String,
    pub caption: String,
    pub shot_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GenerationState {
    #[default]
    Idle,
    Generating,
    Error(String),
}

/// The single status a scene reports at any point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScenePhase {
    Pending,
    Generating,
    Complete,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scene {
    id: String,
    scene_number: usize,
    visual_description: String,
    caption: String,
    shot_type: String,
    image_url: Option<String>,
    state: GenerationState,
}

impl Scene {
    pub(crate) fn from_draft(draft: SceneDraft, scene_number: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scene_number,
            visual_description: draft.visual_description,
            caption: draft.caption,
            shot_type: draft.shot_type,
            image_url: None,
            state: GenerationState::Idle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scene_number(&self) -> usize {
        self.scene_number
    }

    pub fn visual_description(&self) -> &str {
        &self.visual_description
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn shot_type(&self) -> &str {
        &self.shot_type
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn is_generating(&self) -> bool {
        self.state == GenerationState::Generating
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            GenerationState::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// An in-flight or failed regeneration outranks an image kept from an
    /// earlier success.
    pub fn phase(&self) -> ScenePhase {
        match (&self.state, &self.image_url) {
            (GenerationState::Generating, _) => ScenePhase::Generating,
            (GenerationState::Error(_), _) => ScenePhase::Failed,
            (GenerationState::Idle, Some(_)) => ScenePhase::Complete,
            (GenerationState::Idle, None) => ScenePhase::Pending,
        }
    }

    pub(crate) fn begin_generation(&mut self) {
        self.state = GenerationState::Generating;
    }

    pub(crate) fn complete_generation(&mut self, image_url: String) {
        self.image_url = Some(image_url);
        self.state = GenerationState::Idle;
    }

    pub(crate) fn fail_generation(&mut self, message: &str) {
        self.state = GenerationState::Error(message.to_string());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
