use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::core::state::ImageSize;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: String, // "gemini"

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub image: ImageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    /// Falls back to `GEMINI_API_KEY` / `API_KEY` when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_text_model")]
    pub chat_model: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImageConfig {
    #[serde(default)]
    pub size: ImageSize,
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_text_model() -> String {
    "gemini-3-pro-preview".to_string()
}
fn default_image_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_gemini_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            chat_model: default_text_model(),
            timeout_seconds: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            output_folder: default_output(),
            gemini: GeminiConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// A missing file yields the defaults; every field has one.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.gemini.base_url)
            .with_context(|| format!("Invalid gemini.base_url: {}", self.gemini.base_url))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
