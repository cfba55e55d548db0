//! Persona reply generation over a chat completion provider.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use persona_voice_core::config::Config;
use persona_voice_core::error::{Result, VoiceError};
use persona_voice_core::types::{Message, Persona};
use persona_voice_providers::{ChatCompleter, ChatMessage, CompletionRequest};

use crate::prompt::{build_system_prompt, strip_stage_directions};

/// Shown in place of a reply when generation fails.
pub const APOLOGY_REPLY: &str = "I'm sorry, I couldn't generate a response.";

pub struct ResponseGenerator {
    provider: Arc<dyn ChatCompleter>,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(provider: Arc<dyn ChatCompleter>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 500,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(provider: Arc<dyn ChatCompleter>, config: &Config) -> Self {
        Self {
            provider,
            model: config.generation_model(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            timeout: Duration::from_secs(config.generation_timeout_secs()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the completion request: system instruction, prior turns oldest first, then the user text.
    pub fn build_request(
        &self,
        persona: &Persona,
        history: &[Message],
        user_text: &str,
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new("system", &build_system_prompt(persona)));
        messages.extend(
            history
                .iter()
                .map(|m| ChatMessage::new(m.role.as_str(), &m.content)),
        );
        messages.push(ChatMessage::new("user", user_text));

        CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
        }
    }

    /// Generate the persona's reply. Any provider failure, timeout or empty
    /// content is `GenerationFailed`.
    pub async fn generate_reply(
        &self,
        persona: &Persona,
        history: &[Message],
        user_text: &str,
    ) -> Result<String> {
        let request = self.build_request(persona, history, user_text);
        debug!(
            persona = %persona.slug,
            provider = self.provider.id(),
            history = history.len(),
            "Generating reply"
        );

        let content = match tokio::time::timeout(self.timeout, self.provider.complete(&request)).await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                warn!(provider = self.provider.id(), %e, "Completion failed");
                return Err(VoiceError::GenerationFailed(e.to_string()));
            }
            Err(_) => {
                warn!(provider = self.provider.id(), timeout = ?self.timeout, "Completion timed out");
                return Err(VoiceError::GenerationFailed("timed out".into()));
            }
        };

        let reply = content
            .map(|c| strip_stage_directions(&c))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| VoiceError::GenerationFailed("empty completion".into()))?;
        Ok(reply)
    }
}

/// Mask a generation failure behind the fixed apology.
pub fn reply_or_apology(result: Result<String>) -> String {
    match result {
        Ok(reply) => reply,
        Err(e) => {
            debug!(%e, "Substituting apology reply");
            APOLOGY_REPLY.to_string()
        }
    }
}
