use crate::core::config::Config;
use crate::core::error::{Result, StoryboardError};
use crate::utils::lock;
use async_trait::async_trait;
use log::{error, info};
use std::sync::{Arc, Mutex, RwLock};

pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// The ambient mechanism that knows whether a usable API key is selected and
/// how to ask the user for one.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn has_selected_key(&self) -> anyhow::Result<bool>;
    async fn open_select_key(&self) -> anyhow::Result<()>;
    fn api_key(&self) -> Option<String>;
}

fn static_key(config: &Config) -> Option<String> {
    config
        .gemini
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| {
            API_KEY_ENV_VARS
                .iter()
                .find_map(|var| std::env::var(var).ok().filter(|k| !k.trim().is_empty()))
        })
}

/// A key fixed at startup. Selection is a no-op.
pub struct StaticKeyProvider {
    key: Option<String>,
}

impl StaticKeyProvider {
    pub fn new(key: Option<String>) -> Self {
        Self { key }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(static_key(config))
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn has_selected_key(&self) -> anyhow::Result<bool> {
        Ok(self.key.is_some())
    }

    async fn open_select_key(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn api_key(&self) -> Option<String> {
        self.key.clone()
    }
}

/// Asks for the key on the terminal, seeded from config or environment.
pub struct PromptKeyProvider {
    key: RwLock<Option<String>>,
}

impl PromptKeyProvider {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            key: RwLock::new(initial),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(static_key(config))
    }
}

#[async_trait]
impl KeyProvider for PromptKeyProvider {
    async fn has_selected_key(&self) -> anyhow::Result<bool> {
        let key = self
            .key
            .read()
            .map_err(|_| anyhow::anyhow!("API key lock poisoned"))?;
        Ok(key.is_some())
    }

    async fn open_select_key(&self) -> anyhow::Result<()> {
        let answer = tokio::task::spawn_blocking(|| {
            inquire::Password::new("Gemini API key:")
                .without_confirmation()
                .with_display_mode(inquire::PasswordDisplayMode::Masked)
                .with_help_message("Requires a billing-enabled Google Cloud project")
                .prompt()
        })
        .await??;

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Ok(());
        }
        let mut key = self
            .key
            .write()
            .map_err(|_| anyhow::anyhow!("API key lock poisoned"))?;
        *key = Some(answer);
        Ok(())
    }

    fn api_key(&self) -> Option<String> {
        self.key.read().ok().and_then(|k| k.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
    Checking,
    Ready,
    NotReady,
}

/// Single owner of the readiness state. Shared by `Arc` with every component
/// that must not reach the provider without a credential.
pub struct CredentialGate {
    keys: Arc<dyn KeyProvider>,
    state: Mutex<CredentialState>,
}

impl CredentialGate {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            keys,
            state: Mutex::new(CredentialState::Checking),
        }
    }

    pub fn state(&self) -> CredentialState {
        *lock(&self.state)
    }

    pub fn keys(&self) -> Arc<dyn KeyProvider> {
        self.keys.clone()
    }

    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            CredentialState::Ready => Ok(()),
            CredentialState::Checking => Err(StoryboardError::Credential(
                "API key check still in progress".to_string(),
            )),
            CredentialState::NotReady => Err(StoryboardError::Credential(
                "No API key selected".to_string(),
            )),
        }
    }

    /// Never fails: a broken check counts as not ready.
    pub async fn check_ready(&self) -> bool {
        self.set_state(CredentialState::Checking);
        let ready = match self.keys.has_selected_key().await {
            Ok(ready) => ready,
            Err(e) => {
                error!("Error checking API key: {:#}", e);
                false
            }
        };
        self.set_state(if ready {
            CredentialState::Ready
        } else {
            CredentialState::NotReady
        });
        ready
    }

    pub async fn request_authorization(&self) -> bool {
        info!("Requesting API key selection");
        if let Err(e) = self.keys.open_select_key().await {
            error!("Failed to select key: {:#}", e);
        }
        self.check_ready().await
    }

    fn set_state(&self, state: CredentialState) {
        *lock(&self.state) = state;
    }
}
