//! OpenAI-compatible clients: Whisper transcription and chat completions.
//!
//! Groq serves both under `/openai/v1`, so the same code covers Groq and OpenAI.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use persona_voice_core::types::AudioArtifact;

use crate::{ChatCompleter, CompletionRequest, Transcriber};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

fn normalize_base(base_url: Option<&str>, default: &str) -> String {
    base_url.unwrap_or(default).trim_end_matches('/').to_string()
}

pub struct WhisperStt {
    base_url: String,
    api_key: String,
    model: String,
    provider_id: String,
    client: reqwest::Client,
}

impl WhisperStt {
    pub fn groq(api_key: String, base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            base_url: normalize_base(base_url, GROQ_BASE_URL),
            api_key,
            model: model.unwrap_or("whisper-large-v3").to_string(),
            provider_id: "groq".into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(api_key: String, base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            base_url: normalize_base(base_url, OPENAI_BASE_URL),
            api_key,
            model: model.unwrap_or("whisper-1").to_string(),
            provider_id: "openai".into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Transcriber for WhisperStt {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn transcribe(&self, audio: &AudioArtifact) -> anyhow::Result<String> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!(url, model = %self.model, bytes = audio.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let body: WhisperResponse = resp.json().await?;
        Ok(body.text.unwrap_or_default())
    }
}

pub struct ChatCompletions {
    base_url: String,
    api_key: String,
    provider_id: String,
    client: reqwest::Client,
}

impl ChatCompletions {
    pub fn groq(api_key: String, base_url: Option<&str>) -> Self {
        Self {
            base_url: normalize_base(base_url, GROQ_BASE_URL),
            api_key,
            provider_id: "groq".into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(api_key: String, base_url: Option<&str>) -> Self {
        Self {
            base_url: normalize_base(base_url, OPENAI_BASE_URL),
            api_key,
            provider_id: "openai".into(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "stream": false,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatCompleter for ChatCompletions {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<Option<String>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(request);
        trace!(body = %body, "Chat completion request");
        debug!(url, model = %request.model, messages = request.messages.len(), "Requesting completion");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Chat API error {status}: {body}");
        }

        let parsed: ChatResponse = resp.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty()))
    }
}
