//! ElevenLabs speech-to-text, text-to-speech and voice design clients.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use persona_voice_core::config::TtsConfig;
use persona_voice_core::error::{Result as VoiceResult, VoiceError};
use persona_voice_core::types::AudioArtifact;

use crate::{SpeechSynthesizer, SynthesizedAudio, Transcriber};

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_STT_MODEL: &str = "scribe_v1";
const DEFAULT_TTS_MODEL: &str = "eleven_monolingual_v1";

#[derive(Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Read an error response into an `anyhow` error carrying status and body.
async fn api_error(provider: &str, resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    anyhow::anyhow!("{provider} API error {status}: {body}")
}

pub struct ElevenLabsStt {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ElevenLabsStt {
    pub fn new(api_key: String, base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(ELEVENLABS_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or(DEFAULT_STT_MODEL).to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for ElevenLabsStt {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn transcribe(&self, audio: &AudioArtifact) -> anyhow::Result<String> {
        let url = format!("{}/v1/speech-to-text", self.base_url);
        debug!(url, model = %self.model, bytes = audio.len(), "Sending audio to ElevenLabs");

        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model_id", self.model.clone());

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error("ElevenLabs STT", resp).await);
        }

        let body: TranscriptResponse = resp.json().await?;
        Ok(body.text.unwrap_or_default())
    }
}

pub struct ElevenLabsTts {
    base_url: String,
    api_key: String,
    model: String,
    stability: f32,
    similarity_boost: f32,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(api_key: String, config: &TtsConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(ELEVENLABS_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            stability: config.stability.unwrap_or(0.5),
            similarity_boost: config.similarity_boost.unwrap_or(0.5),
            client: reqwest::Client::new(),
        }
    }

    /// Build the text-to-speech request URL for a given voice.
    pub fn tts_url(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{voice_id}", self.base_url)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> anyhow::Result<SynthesizedAudio> {
        let url = self.tts_url(voice_id);
        debug!(voice_id, model = %self.model, text_len = text.len(), "Requesting speech");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": self.model,
                "voice_settings": {
                    "stability": self.stability,
                    "similarity_boost": self.similarity_boost,
                }
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error("ElevenLabs TTS", resp).await);
        }

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("audio/"))
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        if bytes.is_empty() {
            anyhow::bail!("ElevenLabs TTS returned no audio");
        }

        Ok(SynthesizedAudio { bytes, mime_type })
    }
}

/// Describe a voice in words and let ElevenLabs generate it.
#[derive(Debug, Clone)]
pub struct VoiceDesignRequest {
    pub description: String,
    /// Sample sentence spoken in the preview.
    pub preview_text: String,
    pub gender: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DesignedVoice {
    /// Usable directly as a persona `voice_id`.
    pub voice_id: String,
    pub preview: Option<SynthesizedAudio>,
}

#[derive(Deserialize)]
struct DesignResponse {
    #[serde(default)]
    previews: Vec<DesignPreview>,
}

#[derive(Deserialize)]
struct DesignPreview {
    #[serde(default)]
    generated_voice_id: Option<String>,
    #[serde(default)]
    audio_base_64: Option<String>,
}

pub struct ElevenLabsVoiceDesign {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ElevenLabsVoiceDesign {
    pub fn new(api_key: String, config: &TtsConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(ELEVENLABS_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Generate a voice from its description.
    ///
    /// Accounts without voice design (HTTP 402/403) get
    /// `VoiceDesignUnavailable`; callers fall back to the default voice.
    pub async fn design(&self, request: &VoiceDesignRequest) -> VoiceResult<DesignedVoice> {
        if request.description.trim().is_empty() || request.preview_text.trim().is_empty() {
            return Err(VoiceError::Config(
                "voice description and preview text are required".into(),
            ));
        }

        let url = format!("{}/v1/text-to-voice/design", self.base_url);
        debug!(url, description = %request.description, "Designing voice");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&json!({
                "voice_description": request.description,
                "text": request.preview_text,
                "gender": request.gender.as_deref().unwrap_or("male"),
            }))
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        let status = resp.status().as_u16();
        if status == 402 || status == 403 {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "Voice design not available on this plan");
            return Err(VoiceError::VoiceDesignUnavailable(format!("{status}: {body}")));
        }
        if !resp.status().is_success() {
            return Err(api_error("ElevenLabs voice design", resp).await.into());
        }

        let body: DesignResponse = resp.json().await.map_err(anyhow::Error::from)?;
        let preview = body
            .previews
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("voice design returned no previews"))?;
        let voice_id = preview
            .generated_voice_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("voice design returned no voice id"))?;

        let preview = preview
            .audio_base_64
            .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| SynthesizedAudio {
                bytes,
                mime_type: "audio/mpeg".into(),
            });

        info!(voice_id, "Voice designed");
        Ok(DesignedVoice { voice_id, preview })
    }
}
