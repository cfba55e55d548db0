//! Shared wiring: config, stores and the voice pipeline.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use persona_voice_agent::ResponseGenerator;
use persona_voice_core::config::Config;
use persona_voice_core::conversation_store::JsonlConversationStore;
use persona_voice_core::store::{ConversationStore, MemoryPersonaStore, PersonaStore};
use persona_voice_core::types::Persona;
use persona_voice_media::device::AudioSink;
use persona_voice_media::{PlaybackManager, SpeechSynthesisClient, TranscriptionClient, VoicePipeline};
use persona_voice_providers::elevenlabs::VoiceDesignRequest;
use persona_voice_providers::{chat_from_config, synthesizer_from_config, voice_design_from_config};

pub struct App {
    pub config: Config,
    pub personas: Arc<MemoryPersonaStore>,
    pub conversations: Arc<JsonlConversationStore>,
}

impl App {
    pub async fn load(config: Config) -> anyhow::Result<Self> {
        let personas_file = config.personas_file();
        let personas = MemoryPersonaStore::load_file(&personas_file)
            .await
            .with_context(|| format!("loading personas from {}", personas_file.display()))?;
        let conversations = JsonlConversationStore::new(config.conversations_dir());
        debug!(
            personas = %personas_file.display(),
            conversations = %config.conversations_dir().display(),
            "Stores ready"
        );

        Ok(Self {
            config,
            personas: Arc::new(personas),
            conversations: Arc::new(conversations),
        })
    }

    pub async fn persona(&self, slug: &str) -> anyhow::Result<Persona> {
        self.personas
            .get(slug)
            .await?
            .with_context(|| format!("unknown persona '{slug}' (see `persona-voice personas list`)"))
    }

    /// Resume `resume` (re-pointed at `persona`) or start a new conversation.
    pub async fn conversation(&self, persona: &Persona, resume: Option<&str>) -> anyhow::Result<String> {
        match resume {
            Some(id) => {
                self.conversations
                    .get_conversation(id)
                    .await?
                    .with_context(|| format!("conversation {id} not found"))?;
                self.conversations.set_persona(id, &persona.id).await?;
                info!(conversation = id, persona = %persona.slug, "Resuming conversation");
                Ok(id.to_string())
            }
            None => {
                let conversation = self.conversations.create_conversation(&persona.id).await?;
                info!(conversation = %conversation.id, persona = %persona.slug, "Started conversation");
                Ok(conversation.id)
            }
        }
    }

    pub fn generator(&self) -> anyhow::Result<ResponseGenerator> {
        let chat = chat_from_config(&self.config).context(
            "no chat provider configured: set GROQ_API_KEY or generation.api_key in the config",
        )?;
        Ok(ResponseGenerator::from_config(chat, &self.config))
    }

    /// Generate a voice for a new persona. Returns `None` (fallback voice)
    /// when voice design is unavailable or fails.
    pub async fn design_voice(
        &self,
        name: &str,
        description: &str,
        gender: Option<String>,
    ) -> anyhow::Result<Option<String>> {
        let designer = voice_design_from_config(&self.config)
            .context("voice design needs an ElevenLabs key: set ELEVEN_API_KEY or tts.api_key")?;
        let request = VoiceDesignRequest {
            description: description.to_string(),
            preview_text: voice_preview_text(name),
            gender,
        };

        match designer.design(&request).await {
            Ok(voice) => {
                println!("Generated voice {} for {name}", voice.voice_id);
                Ok(Some(voice.voice_id))
            }
            Err(e) => {
                warn!(%e, "Voice design failed");
                eprintln!("{}; using the fallback voice", e.user_message());
                Ok(None)
            }
        }
    }

    pub fn synthesis(&self) -> SpeechSynthesisClient {
        SpeechSynthesisClient::from_config(synthesizer_from_config(&self.config), &self.config)
    }

    pub fn pipeline(&self, sink: Arc<dyn AudioSink>) -> anyhow::Result<Arc<VoicePipeline>> {
        let transcription = TranscriptionClient::from_config(&self.config);
        if transcription.provider_ids().is_empty() {
            anyhow::bail!("no transcription provider configured: set ELEVEN_API_KEY or GROQ_API_KEY");
        }

        Ok(Arc::new(VoicePipeline {
            transcription,
            generator: self.generator()?,
            synthesis: self.synthesis(),
            playback: Arc::new(PlaybackManager::new(sink)),
            conversations: self.conversations.clone(),
        }))
    }
}

/// Preview sentence for a designed voice. ElevenLabs wants at least 100 characters.
fn voice_preview_text(name: &str) -> String {
    format!(
        "Hello, I'm {name}. Thanks for stopping by to talk. Ask me anything you like \
         and I'll tell you what I honestly think about it."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_preview_text_is_long_enough() {
        let text = voice_preview_text("Al");
        assert!(text.chars().count() >= 100, "{}", text.len());
        assert!(text.starts_with("Hello, I'm Al."));
    }
}
