use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoryboardError {
    /// No usable provider credential; recoverable through the authorization flow.
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Image generation error: {0}")]
    ImageGeneration(String),

    #[error("Chat stream error: {0}")]
    ChatStream(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoryboardError {
    pub fn is_credential(&self) -> bool {
        matches!(self, StoryboardError::Credential(_))
    }
}

pub type Result<T> = std::result::Result<T, StoryboardError>;
