//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Persona Voice configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Speech-to-text configuration. Providers are tried in list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_providers")]
    pub providers: Vec<SttProviderConfig>,

    /// Per-provider request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            providers: default_transcription_providers(),
            timeout_secs: None,
        }
    }
}

fn default_transcription_providers() -> Vec<SttProviderConfig> {
    vec![
        SttProviderConfig {
            provider: "elevenlabs".into(),
            api_key: None,
            api_key_env: Some("ELEVEN_API_KEY".into()),
            base_url: None,
            model: None,
        },
        SttProviderConfig {
            provider: "groq".into(),
            api_key: None,
            api_key_env: Some("GROQ_API_KEY".into()),
            base_url: None,
            model: None,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttProviderConfig {
    /// "elevenlabs", "groq" or "openai".
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name (e.g. "whisper-large-v3").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SttProviderConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Reply generation (chat completion) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// "groq" (default) or "openai"; any OpenAI-compatible endpoint works via `base_url`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_generation_provider() -> String {
    "groq".into()
}

impl GenerationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            let env_var = match self.provider.as_str() {
                "openai" => "OPENAI_API_KEY",
                _ => "GROQ_API_KEY",
            };
            std::env::var(env_var).ok().filter(|v| !v.is_empty())
        })
    }
}

/// Text-to-speech (TTS) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Voice used when neither the call nor the persona names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_voice: Option<String>,

    /// Model ID (e.g. "eleven_monolingual_v1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Input text budget in characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| std::env::var("ELEVEN_API_KEY").ok().filter(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Recordings smaller than this are rejected (default: 1000 bytes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_bytes: Option<usize>,

    /// Declared encoding of recorded audio (default: "audio/webm").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a transient error notice stays visible (default: 3s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for conversation transcripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversations_dir: Option<String>,

    /// JSON file holding persona definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personas_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "persona_voice_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex");
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoiceError::Io)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn transcription_timeout_secs(&self) -> u64 {
        self.transcription
            .as_ref()
            .and_then(|t| t.timeout_secs)
            .unwrap_or(20)
    }

    pub fn generation(&self) -> GenerationConfig {
        self.generation.clone().unwrap_or_else(|| GenerationConfig {
            provider: default_generation_provider(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: None,
        })
    }

    pub fn generation_model(&self) -> String {
        self.generation
            .as_ref()
            .and_then(|g| g.model.clone())
            .unwrap_or_else(|| "llama-3.1-70b-versatile".to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.generation
            .as_ref()
            .and_then(|g| g.max_tokens)
            .unwrap_or(500)
    }

    pub fn temperature(&self) -> f64 {
        self.generation
            .as_ref()
            .and_then(|g| g.temperature)
            .unwrap_or(0.7)
    }

    pub fn generation_timeout_secs(&self) -> u64 {
        self.generation
            .as_ref()
            .and_then(|g| g.timeout_secs)
            .unwrap_or(30)
    }

    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn fallback_voice(&self) -> String {
        self.tts
            .as_ref()
            .and_then(|t| t.fallback_voice.clone())
            .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string())
    }

    pub fn tts_max_chars(&self) -> usize {
        self.tts.as_ref().and_then(|t| t.max_chars).unwrap_or(150)
    }

    pub fn tts_timeout_secs(&self) -> u64 {
        self.tts.as_ref().and_then(|t| t.timeout_secs).unwrap_or(20)
    }

    pub fn min_recording_bytes(&self) -> usize {
        self.capture
            .as_ref()
            .and_then(|c| c.min_bytes)
            .unwrap_or(1000)
    }

    pub fn recording_mime_type(&self) -> String {
        self.capture
            .as_ref()
            .and_then(|c| c.mime_type.clone())
            .unwrap_or_else(|| "audio/webm".to_string())
    }

    pub fn notice_secs(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.notice_secs)
            .unwrap_or(3)
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.conversations_dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("conversations"))
    }

    pub fn personas_file(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.personas_file.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("personas.json"))
    }

    /// Get a config value by dotted path (e.g. "tts.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let transcription = self.transcription();
        if transcription.providers.is_empty() {
            errors.push("No transcription providers configured".to_string());
        }
        for p in &transcription.providers {
            if !matches!(p.provider.as_str(), "elevenlabs" | "groq" | "openai") {
                errors.push(format!("Unknown transcription provider '{}'", p.provider));
            } else if p.resolve_api_key().is_none() {
                warnings.push(format!(
                    "Transcription provider '{}' has no API key configured",
                    p.provider
                ));
            }
        }

        if self.generation().resolve_api_key().is_none() {
            warnings.push("Generation provider has no API key configured".to_string());
        }

        if self.tts().resolve_api_key().is_none() {
            warnings.push("TTS has no API key configured; replies will be text-only".to_string());
        }

        if self.tts_max_chars() == 0 {
            errors.push("tts.max_chars cannot be 0".to_string());
        }

        let temperature = self.temperature();
        if !(0.0..=2.0).contains(&temperature) {
            errors.push(format!("generation.temperature {temperature} is out of range 0..=2"));
        }

        (warnings, errors)
    }
}

/// Base directory for Persona Voice data: `~/.persona_voice/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".persona_voice")
}
