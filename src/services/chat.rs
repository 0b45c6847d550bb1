use crate::core::error::Result;
use crate::core::state::{ChatMessage, ChatRole};
use crate::services::credential::CredentialGate;
use crate::services::prompt::CHAT_GREETING;
use crate::services::provider::{ChatSession, ProviderClient};
use crate::utils::lock;
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const GREETING_ID: &str = "init";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatPhase {
    Unopened,
    Opening,
    Open,
}

struct ChatState {
    phase: ChatPhase,
    session: Option<Arc<dyn ChatSession>>,
    messages: Vec<ChatMessage>,
    is_typing: bool,
    cancel: Option<CancellationToken>,
}

struct TypingReset<'a>(&'a Mutex<ChatState>);

impl Drop for TypingReset<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.0);
        state.is_typing = false;
        state.cancel = None;
    }
}

/// The assistant conversation. Holds one provider session for its whole
/// lifetime; there is no reset.
pub struct ChatProxy {
    provider: Arc<dyn ProviderClient>,
    gate: Arc<CredentialGate>,
    state: Mutex<ChatState>,
}

impl ChatProxy {
    pub fn new(provider: Arc<dyn ProviderClient>, gate: Arc<CredentialGate>) -> Self {
        Self {
            provider,
            gate,
            state: Mutex::new(ChatState {
                phase: ChatPhase::Unopened,
                session: None,
                messages: Vec::new(),
                is_typing: false,
                cancel: None,
            }),
        }
    }

    pub fn phase(&self) -> ChatPhase {
        lock(&self.state).phase
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.state).messages.clone()
    }

    pub fn is_typing(&self) -> bool {
        lock(&self.state).is_typing
    }

    /// Opens the provider session on first use and seeds the greeting.
    /// A failed open returns to `Unopened` so it can be retried.
    pub async fn open(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.phase != ChatPhase::Unopened {
                return Ok(());
            }
            self.gate.ensure_ready()?;
            state.phase = ChatPhase::Opening;
        }

        match self.provider.open_chat_session().await {
            Ok(session) => {
                let mut state = lock(&self.state);
                state.session = Some(session);
                state.phase = ChatPhase::Open;
                state.messages = vec![ChatMessage {
                    id: GREETING_ID.to_string(),
                    role: ChatRole::Assistant,
                    text: CHAT_GREETING.to_string(),
                    timestamp: Utc::now(),
                }];
                info!("Chat session opened");
                Ok(())
            }
            Err(e) => {
                error!("Failed to init chat: {}", e);
                lock(&self.state).phase = ChatPhase::Unopened;
                if e.is_credential() {
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        self.send_with(text, |_| {}).await
    }

    /// Sends one user turn and streams the reply into a new assistant
    /// message. `on_delta` sees each fragment after it has been applied.
    ///
    /// Stream failures are logged and leave the partial reply in place.
    pub async fn send_with(&self, text: &str, mut on_delta: impl FnMut(&str) + Send) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let session = lock(&self.state).session.clone();
        let Some(session) = session else {
            return Ok(());
        };
        self.gate.ensure_ready()?;

        let token = CancellationToken::new();
        {
            let mut state = lock(&self.state);
            if state.is_typing {
                debug!("Reply still streaming, ignoring message");
                return Ok(());
            }
            state.messages.push(ChatMessage::new(ChatRole::User, text));
            state.is_typing = true;
            state.cancel = Some(token.clone());
        }
        let _typing = TypingReset(&self.state);

        let deltas = match session.send_message_stream(text).await {
            Ok(deltas) => deltas,
            Err(e) => {
                error!("Chat error: {}", e);
                if e.is_credential() {
                    return Err(e);
                }
                return Ok(());
            }
        };

        let reply = ChatMessage::new(ChatRole::Assistant, "");
        let reply_id = reply.id.clone();
        lock(&self.state).messages.push(reply);

        let stop = token.clone();
        let mut deltas = Box::pin(deltas.take_until(async move { stop.cancelled().await }));
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) if delta.is_empty() => {}
                Ok(delta) => {
                    {
                        let mut state = lock(&self.state);
                        if let Some(msg) = state.messages.iter_mut().rev().find(|m| m.id == reply_id) {
                            msg.text.push_str(&delta);
                        }
                    }
                    on_delta(&delta);
                }
                Err(e) => {
                    error!("Chat stream error: {}", e);
                    break;
                }
            }
        }

        if token.is_cancelled() {
            info!("Chat reply cancelled");
        }
        Ok(())
    }

    /// Stops the reply currently streaming, if any. Text received so far stays.
    pub fn cancel(&self) -> bool {
        match lock(&self.state).cancel.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
