//! Speech synthesis with voice resolution and text truncation.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tracing::{debug, warn};

use persona_voice_core::config::Config;
use persona_voice_core::error::{Result, VoiceError};
use persona_voice_core::types::Persona;
use persona_voice_providers::SpeechSynthesizer;

/// Voice used when neither the request nor the persona names one.
pub const DEFAULT_FALLBACK_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

const TRUNCATION_MARKER: &str = "...";

/// Synthesized audio ready for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioResource {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioResource {
    pub fn new(bytes: Vec<u8>, mime_type: &str) -> Self {
        Self {
            bytes,
            mime_type: mime_type.to_string(),
        }
    }

    /// Inline `data:` URL, the form stored on assistant messages.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Decode a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, payload) = rest.split_once(";base64,")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?;
        Some(Self::new(bytes, mime_type))
    }
}

/// Voice ids are opaque provider tokens; only path-safe characters are accepted.
pub fn is_well_formed_voice_id(voice_id: &str) -> bool {
    !voice_id.is_empty()
        && voice_id.len() <= 64
        && voice_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_for_speech(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

pub struct SpeechSynthesisClient {
    provider: Option<Arc<dyn SpeechSynthesizer>>,
    fallback_voice: String,
    max_chars: usize,
    timeout: Duration,
}

impl SpeechSynthesisClient {
    pub fn new(provider: Option<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self {
            provider,
            fallback_voice: DEFAULT_FALLBACK_VOICE.to_string(),
            max_chars: 150,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn from_config(provider: Option<Arc<dyn SpeechSynthesizer>>, config: &Config) -> Self {
        Self {
            provider,
            fallback_voice: config.fallback_voice(),
            max_chars: config.tts_max_chars(),
            timeout: Duration::from_secs(config.tts_timeout_secs()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Pick the voice: explicit request, then persona default, then fallback.
    /// Blank values count as absent.
    pub fn resolve_voice<'a>(
        &'a self,
        explicit: Option<&'a str>,
        persona_default: Option<&'a str>,
    ) -> Result<&'a str> {
        let supplied = [explicit, persona_default]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|v| !v.is_empty());

        match supplied {
            Some(voice) if is_well_formed_voice_id(voice) => Ok(voice),
            Some(voice) => Err(VoiceError::VoiceSynthesisFailed(format!(
                "malformed voice id '{voice}'"
            ))),
            None => Ok(&self.fallback_voice),
        }
    }

    /// Synthesize `text` in the given voice. The text is truncated first.
    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioResource> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            VoiceError::VoiceSynthesisFailed("no speech synthesis provider configured".into())
        })?;

        let text = truncate_for_speech(text, self.max_chars);
        debug!(
            provider = provider.id(),
            voice_id,
            chars = text.chars().count(),
            "Synthesizing speech"
        );

        match tokio::time::timeout(self.timeout, provider.synthesize(&text, voice_id)).await {
            Ok(Ok(audio)) => Ok(AudioResource {
                bytes: audio.bytes,
                mime_type: audio.mime_type,
            }),
            Ok(Err(e)) => {
                warn!(provider = provider.id(), voice_id, %e, "Speech synthesis failed");
                Err(VoiceError::VoiceSynthesisFailed(e.to_string()))
            }
            Err(_) => {
                warn!(provider = provider.id(), timeout = ?self.timeout, "Speech synthesis timed out");
                Err(VoiceError::VoiceSynthesisFailed("timed out".into()))
            }
        }
    }

    /// Synthesize in the voice resolved for `persona`.
    pub async fn synthesize_for(
        &self,
        text: &str,
        explicit_voice: Option<&str>,
        persona: &Persona,
    ) -> Result<AudioResource> {
        let voice = self.resolve_voice(explicit_voice, persona.voice_id.as_deref())?;
        self.synthesize(text, voice).await
    }
}
