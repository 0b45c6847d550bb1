pub mod gemini;

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::state::{ImageSize, SceneDraft};
use crate::services::credential::KeyProvider;
use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

pub use gemini::GeminiClient;

/// Ordered assistant text fragments for one chat turn. Finite and not
/// restartable; dropping it abandons the underlying request.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn send_message_stream(&self, text: &str) -> Result<TextStream>;
}

/// The three calls made against the generative provider. Implementations
/// resolve the API key on every call.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn analyze_script(&self, script: &str) -> Result<Vec<SceneDraft>>;

    /// Returns the first generated image as a `data:` URL.
    async fn generate_image(&self, prompt: &str, size: ImageSize) -> Result<String>;

    async fn open_chat_session(&self) -> Result<Arc<dyn ChatSession>>;
}

pub fn create_provider(
    config: &Config,
    keys: Arc<dyn KeyProvider>,
) -> anyhow::Result<Arc<dyn ProviderClient>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(&config.gemini, keys)?)),
        _ => Err(anyhow!("Unknown provider: {}", config.provider)),
    }
}
