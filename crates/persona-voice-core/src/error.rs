use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Recording too short: {size} bytes (minimum {min})")]
    RecordingTooShort { size: usize, min: usize },

    #[error("A recording is already in progress")]
    RecordingInProgress,

    #[error("No active recording")]
    NotRecording,

    #[error("No speech detected")]
    NoSpeechDetected,

    #[error("Transcription unavailable: {0}")]
    TranscriptionUnavailable(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Voice synthesis failed: {0}")]
    VoiceSynthesisFailed(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Voice design unavailable on this plan: {0}")]
    VoiceDesignUnavailable(String),

    #[error("Stale response dropped for closed session")]
    StaleResponse,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoiceError {
    /// Short text suitable for a transient user-facing notice.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => "Failed to access microphone".into(),
            Self::RecordingTooShort { .. } => "Recording too short".into(),
            Self::NoSpeechDetected => "No speech detected, please try again".into(),
            Self::TranscriptionUnavailable(_) => "Speech-to-text service unavailable".into(),
            Self::GenerationFailed(_) => "Failed to generate response".into(),
            Self::VoiceSynthesisFailed(_) => "Failed to generate speech".into(),
            Self::Playback(_) => "Failed to play audio".into(),
            Self::VoiceDesignUnavailable(_) => {
                "Voice generation requires a higher ElevenLabs plan".into()
            }
            _ => "Voice interaction failed".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
