//! Voice pipeline: microphone capture, transcription with failover, speech
//! synthesis, exclusive playback, the voice session controller and the
//! frequency-band visualizer.

pub mod capture;
pub mod device;
pub mod playback;
pub mod slot;
pub mod stt;
pub mod tts;
pub mod visualize;
pub mod voice_session;

pub use capture::AudioCapture;
pub use playback::{PlaybackManager, PlaybackOutcome};
pub use stt::TranscriptionClient;
pub use tts::{AudioResource, SpeechSynthesisClient};
pub use voice_session::{Trigger, TurnOutcome, VoicePipeline, VoiceSessionController, VoiceState};
