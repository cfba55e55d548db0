//! Provider abstraction for the voice pipeline.
//!
//! Each external service implements one of [`Transcriber`], [`ChatCompleter`]
//! or [`SpeechSynthesizer`]. Implementations return `anyhow::Result`; the
//! media layer maps failures onto the typed voice errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use persona_voice_core::config::{Config, TranscriptionConfig};
use persona_voice_core::types::AudioArtifact;

pub mod elevenlabs;
pub mod openai;

/// One chat message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// A non-streaming completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

/// Encoded audio returned by a synthesis provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Speech-to-text provider.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Provider identifier (e.g., "elevenlabs", "groq").
    fn id(&self) -> &str;

    /// Transcribe one recording. Returns the raw (untrimmed) text, possibly empty.
    async fn transcribe(&self, audio: &AudioArtifact) -> anyhow::Result<String>;
}

/// Chat completion provider.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    fn id(&self) -> &str;

    /// Run a completion. `Ok(None)` means the provider answered without content.
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<Option<String>>;
}

/// Text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn id(&self) -> &str;

    async fn synthesize(&self, text: &str, voice_id: &str) -> anyhow::Result<SynthesizedAudio>;
}

/// Build the ordered transcription providers. Providers without an API key are skipped.
pub fn transcribers_from_config(config: &TranscriptionConfig) -> Vec<Arc<dyn Transcriber>> {
    let mut out: Vec<Arc<dyn Transcriber>> = Vec::new();
    for p in &config.providers {
        let Some(api_key) = p.resolve_api_key() else {
            debug!(provider = %p.provider, "Skipping transcription provider without API key");
            continue;
        };
        let base_url = p.base_url.as_deref();
        let model = p.model.as_deref();
        match p.provider.as_str() {
            "elevenlabs" => out.push(Arc::new(elevenlabs::ElevenLabsStt::new(api_key, base_url, model))),
            "groq" => out.push(Arc::new(openai::WhisperStt::groq(api_key, base_url, model))),
            "openai" => out.push(Arc::new(openai::WhisperStt::openai(api_key, base_url, model))),
            other => debug!(provider = other, "Unknown transcription provider"),
        }
    }
    out
}

/// Build the chat completion provider, if an API key is configured.
pub fn chat_from_config(config: &Config) -> Option<Arc<dyn ChatCompleter>> {
    let generation = config.generation();
    let api_key = generation.resolve_api_key()?;
    let base_url = generation.base_url.as_deref();
    let provider = match generation.provider.as_str() {
        "openai" => openai::ChatCompletions::openai(api_key, base_url),
        _ => openai::ChatCompletions::groq(api_key, base_url),
    };
    Some(Arc::new(provider))
}

/// Build the speech synthesis provider, if an API key is configured.
pub fn synthesizer_from_config(config: &Config) -> Option<Arc<dyn SpeechSynthesizer>> {
    let tts = config.tts();
    let api_key = tts.resolve_api_key()?;
    Some(Arc::new(elevenlabs::ElevenLabsTts::new(api_key, &tts)))
}

/// Build the voice design client, if an ElevenLabs key is configured.
pub fn voice_design_from_config(config: &Config) -> Option<elevenlabs::ElevenLabsVoiceDesign> {
    let tts = config.tts();
    let api_key = tts.resolve_api_key()?;
    Some(elevenlabs::ElevenLabsVoiceDesign::new(api_key, &tts))
}
