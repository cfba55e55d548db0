//! Transcription client with ordered provider failover.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use persona_voice_core::config::Config;
use persona_voice_core::error::{Result, VoiceError};
use persona_voice_core::types::AudioArtifact;
use persona_voice_providers::{Transcriber, transcribers_from_config};

/// Tries each transcription provider once, in order, with the same artifact.
pub struct TranscriptionClient {
    providers: Vec<Arc<dyn Transcriber>>,
    timeout: Duration,
}

impl TranscriptionClient {
    pub fn new(providers: Vec<Arc<dyn Transcriber>>) -> Self {
        Self {
            providers,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            providers: transcribers_from_config(&config.transcription()),
            timeout: Duration::from_secs(config.transcription_timeout_secs()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Transcribe a recording.
    ///
    /// A provider that answers ends the search, even with an empty transcript
    /// (that is `NoSpeechDetected`, not a reason to ask the next provider).
    pub async fn transcribe(&self, audio: &AudioArtifact) -> Result<String> {
        let mut failures = Vec::new();

        for (i, provider) in self.providers.iter().enumerate() {
            let attempt = i + 1;
            debug!(provider = provider.id(), attempt, bytes = audio.len(), "Transcribing");

            let error = match tokio::time::timeout(self.timeout, provider.transcribe(audio)).await {
                Ok(Ok(text)) => {
                    if attempt > 1 {
                        info!(provider = provider.id(), attempt, "Failover succeeded");
                    }
                    let text = text.trim();
                    if text.is_empty() {
                        return Err(VoiceError::NoSpeechDetected);
                    }
                    return Ok(text.to_string());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };

            warn!(
                provider = provider.id(),
                attempt,
                error = %error,
                "Provider failed, trying next"
            );
            failures.push(format!("{}: {error}", provider.id()));
        }

        if failures.is_empty() {
            return Err(VoiceError::TranscriptionUnavailable(
                "no transcription providers configured".into(),
            ));
        }
        Err(VoiceError::TranscriptionUnavailable(failures.join("; ")))
    }
}
