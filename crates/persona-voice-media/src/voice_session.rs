//! Voice session controller: one push-to-talk conversation with a persona.
//!
//! Drives Idle -> Listening -> Processing -> Talking -> Listening (hands-free)
//! and publishes state and transient notices on watch channels. Closing the
//! session bumps an epoch so that work still in flight is discarded when it
//! resolves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use persona_voice_agent::{ResponseGenerator, reply_or_apology};
use persona_voice_core::error::{Result, VoiceError};
use persona_voice_core::store::ConversationStore;
use persona_voice_core::types::{Persona, Role};

use crate::capture::AudioCapture;
use crate::playback::{PlaybackManager, PlaybackOutcome};
use crate::slot::Lease;
use crate::stt::TranscriptionClient;
use crate::tts::{AudioResource, SpeechSynthesisClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    Listening,
    Processing,
    Talking,
}

/// A transient error notice. Cleared automatically after the session's notice TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub transcript: String,
    pub reply: String,
    /// `None` when speech synthesis failed and the reply is text only.
    pub audio: Option<AudioResource>,
    /// Whether the session went back to listening after playback.
    pub relistening: bool,
}

/// What a trigger did.
#[derive(Debug, Clone)]
pub enum Trigger {
    Started,
    Completed(TurnOutcome),
    /// The trigger was not valid in the current state.
    Ignored,
}

/// Services shared by every voice session.
pub struct VoicePipeline {
    pub transcription: TranscriptionClient,
    pub generator: ResponseGenerator,
    pub synthesis: SpeechSynthesisClient,
    pub playback: Arc<PlaybackManager>,
    pub conversations: Arc<dyn ConversationStore>,
}

struct Inner {
    epoch: u64,
    cancel: CancellationToken,
    persona: Persona,
    /// Playback lease while Talking, so `close()` can stop it in place.
    playback: Option<Lease>,
}

pub struct VoiceSessionController {
    pipeline: Arc<VoicePipeline>,
    capture: AudioCapture,
    conversation_id: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<VoiceState>,
    notice_tx: Arc<watch::Sender<Option<Notice>>>,
    notice_ttl: Duration,
    next_notice: AtomicU64,
}

impl VoiceSessionController {
    pub fn new(
        pipeline: Arc<VoicePipeline>,
        capture: AudioCapture,
        conversation_id: impl Into<String>,
        persona: Persona,
    ) -> Self {
        let (state_tx, _) = watch::channel(VoiceState::Idle);
        let (notice_tx, _) = watch::channel(None);
        Self {
            pipeline,
            capture,
            conversation_id: conversation_id.into(),
            inner: Mutex::new(Inner {
                epoch: 0,
                cancel: CancellationToken::new(),
                persona,
                playback: None,
            }),
            state_tx,
            notice_tx: Arc::new(notice_tx),
            notice_ttl: Duration::from_secs(3),
            next_notice: AtomicU64::new(1),
        }
    }

    pub fn with_notice_ttl(mut self, ttl: Duration) -> Self {
        self.notice_ttl = ttl;
        self
    }

    pub fn state(&self) -> VoiceState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<VoiceState> {
        self.state_tx.subscribe()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.notice_tx.borrow().clone()
    }

    pub fn subscribe_notices(&self) -> watch::Receiver<Option<Notice>> {
        self.notice_tx.subscribe()
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn persona(&self) -> Persona {
        self.lock().persona.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    /// Point the conversation at another persona. Takes effect from the next reply.
    pub async fn switch_persona(&self, persona: Persona) -> Result<()> {
        self.pipeline
            .conversations
            .set_persona(&self.conversation_id, &persona.id)
            .await?;
        info!(persona = %persona.slug, conversation = %self.conversation_id, "Persona switched");
        self.lock().persona = persona;
        Ok(())
    }

    /// Start recording. Ignored unless the session is idle.
    pub async fn start_listening(&self) -> Result<Trigger> {
        let (epoch, _) = self.current();
        self.enter_listening(epoch, VoiceState::Idle).await
    }

    /// Stop recording and run the turn. Ignored unless the session is listening.
    pub async fn stop_and_process(&self) -> Result<Trigger> {
        let (epoch, cancel) = self.current();
        if !self.transition_if_current(epoch, VoiceState::Listening, VoiceState::Processing) {
            debug!(state = ?self.state(), "Stop ignored");
            return Ok(Trigger::Ignored);
        }
        self.run_turn(epoch, &cancel).await.map(Trigger::Completed)
    }

    /// Push-to-talk button: start when idle, stop and process when listening.
    pub async fn toggle(&self) -> Result<Trigger> {
        match self.state() {
            VoiceState::Idle => self.start_listening().await,
            VoiceState::Listening => self.stop_and_process().await,
            VoiceState::Processing | VoiceState::Talking => Ok(Trigger::Ignored),
        }
    }

    /// End the session from any state: release the microphone, stop this
    /// session's playback and discard in-flight results.
    pub fn close(&self) {
        let playback = {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.cancel.cancel();
            inner.cancel = CancellationToken::new();
            self.state_tx.send_replace(VoiceState::Idle);
            inner.playback.take()
        };
        if let Some(lease) = playback {
            self.pipeline.playback.stop_lease(&lease);
        }
        self.capture.cancel();
        self.notice_tx.send_replace(None);
        info!(conversation = %self.conversation_id, "Voice session closed");
    }

    async fn enter_listening(&self, epoch: u64, from: VoiceState) -> Result<Trigger> {
        if !self.transition_if_current(epoch, from, VoiceState::Listening) {
            debug!(state = ?self.state(), "Start ignored");
            return Ok(Trigger::Ignored);
        }

        match self.capture.start_listening().await {
            Ok(()) if self.is_current(epoch) => Ok(Trigger::Started),
            Ok(()) => {
                self.capture.cancel();
                Err(VoiceError::StaleResponse)
            }
            Err(e) => Err(self.fail(epoch, e)),
        }
    }

    async fn run_turn(&self, epoch: u64, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let pipeline = self.pipeline.clone();

        let artifact = self
            .capture
            .stop_listening()
            .await
            .map_err(|e| self.fail(epoch, e))?;
        self.ensure_current(epoch)?;

        let transcript = pipeline
            .transcription
            .transcribe(&artifact)
            .await
            .map_err(|e| self.fail(epoch, e))?;
        self.ensure_current(epoch)?;
        info!(chars = transcript.len(), "Transcribed");

        let persona = self.persona();
        let history = match pipeline
            .conversations
            .get_conversation(&self.conversation_id)
            .await
        {
            Ok(Some(conversation)) => conversation.messages,
            Ok(None) => {
                let e = VoiceError::NotFound(format!("conversation {}", self.conversation_id));
                return Err(self.fail(epoch, e));
            }
            Err(e) => return Err(self.fail(epoch, e)),
        };
        self.ensure_current(epoch)?;

        pipeline
            .conversations
            .append_message(&self.conversation_id, Role::User, &transcript, None, None)
            .await
            .map_err(|e| self.fail(epoch, e))?;

        let reply = reply_or_apology(
            pipeline
                .generator
                .generate_reply(&persona, &history, &transcript)
                .await,
        );
        self.ensure_current(epoch)?;

        let audio = match pipeline.synthesis.synthesize_for(&reply, None, &persona).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!(%e, "Reply will be text only");
                None
            }
        };
        self.ensure_current(epoch)?;

        pipeline
            .conversations
            .append_message(
                &self.conversation_id,
                Role::Assistant,
                &reply,
                audio.as_ref().map(AudioResource::data_url),
                Some(persona.id.clone()),
            )
            .await
            .map_err(|e| self.fail(epoch, e))?;
        self.ensure_current(epoch)?;

        let mut outcome = TurnOutcome {
            transcript,
            reply,
            audio: None,
            relistening: false,
        };

        let Some(audio) = audio else {
            if !self.transition_if_current(epoch, VoiceState::Processing, VoiceState::Idle) {
                return Err(VoiceError::StaleResponse);
            }
            return Ok(outcome);
        };

        let lease = self.start_talking(epoch)?;
        let played = pipeline.playback.play_leased(&lease, &audio, cancel).await;
        self.clear_playback(&lease);
        self.ensure_current(epoch)?;
        outcome.audio = Some(audio);

        match played {
            Ok(PlaybackOutcome::Completed) => {
                outcome.relistening = matches!(
                    self.enter_listening(epoch, VoiceState::Talking).await,
                    Ok(Trigger::Started)
                );
            }
            Ok(PlaybackOutcome::Stopped) => {
                debug!("Playback stopped by another source");
                if !self.transition_if_current(epoch, VoiceState::Talking, VoiceState::Idle) {
                    return Err(VoiceError::StaleResponse);
                }
            }
            Err(e) => return Err(self.fail(epoch, e)),
        }
        Ok(outcome)
    }

    /// Processing -> Talking for turn `epoch`, taking the output in the same step.
    fn start_talking(&self, epoch: u64) -> Result<Lease> {
        let mut inner = self.lock();
        if inner.epoch != epoch || !self.transition(VoiceState::Processing, VoiceState::Talking) {
            debug!(epoch, "Discarding stale result");
            return Err(VoiceError::StaleResponse);
        }
        let lease = self.pipeline.playback.begin();
        inner.playback = Some(lease.clone());
        Ok(lease)
    }

    fn clear_playback(&self, lease: &Lease) {
        let mut inner = self.lock();
        if inner.playback.as_ref().is_some_and(|l| l.id() == lease.id()) {
            inner.playback = None;
        }
    }

    /// `transition`, but only while turn `epoch` is still the session's.
    fn transition_if_current(&self, epoch: u64, from: VoiceState, to: VoiceState) -> bool {
        let inner = self.lock();
        inner.epoch == epoch && self.transition(from, to)
    }

    /// Compare-and-set on the published state.
    fn transition(&self, from: VoiceState, to: VoiceState) -> bool {
        let moved = self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(?from, ?to, "Voice state");
        }
        moved
    }

    /// Abort the turn: back to Idle with a notice, unless the session has moved on.
    fn fail(&self, epoch: u64, error: VoiceError) -> VoiceError {
        {
            let inner = self.lock();
            if inner.epoch != epoch {
                return VoiceError::StaleResponse;
            }
            warn!(%error, state = ?self.state(), "Voice turn failed");
            self.state_tx.send_replace(VoiceState::Idle);
        }
        self.capture.cancel();
        self.post_notice(error.user_message());
        error
    }

    fn post_notice(&self, message: String) {
        let id = self.next_notice.fetch_add(1, Ordering::Relaxed);
        self.notice_tx.send_replace(Some(Notice { id, message }));

        let notice_tx = self.notice_tx.clone();
        let ttl = self.notice_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            notice_tx.send_if_modified(|notice| {
                if notice.as_ref().is_some_and(|n| n.id == id) {
                    *notice = None;
                    true
                } else {
                    false
                }
            });
        });
    }

    fn current(&self) -> (u64, CancellationToken) {
        let inner = self.lock();
        (inner.epoch, inner.cancel.clone())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            debug!(epoch, "Discarding stale result");
            Err(VoiceError::StaleResponse)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for VoiceSessionController {
    fn drop(&mut self) {
        let playback = {
            let mut inner = self.lock();
            inner.cancel.cancel();
            inner.playback.take()
        };
        if let Some(lease) = playback {
            self.pipeline.playback.stop_lease(&lease);
        }
        self.capture.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use persona_voice_core::store::MemoryConversationStore;
    use persona_voice_core::types::{
        AudioArtifact, Conversation, ConversationWithMessages, Message, NewPersona,
    };
    use tokio::sync::Semaphore;
    use persona_voice_providers::{
        ChatCompleter, CompletionRequest, SpeechSynthesizer, SynthesizedAudio, Transcriber,
    };

    use crate::capture::tests::{FakeMic, isolated as isolated_capture};
    use crate::playback::tests::{FakeSink, isolated as isolated_playback};

    struct FixedStt(std::result::Result<&'static str, &'static str>, AtomicUsize);

    #[async_trait]
    impl Transcriber for FixedStt {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn transcribe(&self, _audio: &AudioArtifact) -> anyhow::Result<String> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.map(str::to_string).map_err(|e| anyhow::anyhow!(e))
        }
    }

    struct FixedChat(Option<&'static str>);

    #[async_trait]
    impl ChatCompleter for FixedChat {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: &CompletionRequest) -> anyhow::Result<Option<String>> {
            match self.0 {
                Some(reply) => Ok(Some(reply.to_string())),
                None => anyhow::bail!("Chat API error 500"),
            }
        }
    }

    struct FixedSynth {
        fail: bool,
        voices: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FixedSynth {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn synthesize(&self, _text: &str, voice_id: &str) -> anyhow::Result<SynthesizedAudio> {
            self.voices.lock().unwrap().push(voice_id.to_string());
            if self.fail {
                anyhow::bail!("ElevenLabs TTS API error 500");
            }
            Ok(SynthesizedAudio {
                bytes: vec![0xff, 0xfb, 0x90],
                mime_type: "audio/mpeg".into(),
            })
        }
    }

    /// Holds every assistant reply at the store until a permit is released.
    struct GatedStore {
        inner: Arc<MemoryConversationStore>,
        permits: Semaphore,
        parked: watch::Sender<usize>,
    }

    impl GatedStore {
        fn new(inner: Arc<MemoryConversationStore>) -> Self {
            Self {
                inner,
                permits: Semaphore::new(0),
                parked: watch::channel(0).0,
            }
        }

        async fn wait_parked(&self, count: usize) {
            self.parked
                .subscribe()
                .wait_for(|n| *n >= count)
                .await
                .unwrap();
        }

        fn release_one(&self) {
            self.permits.add_permits(1);
        }
    }

    #[async_trait]
    impl ConversationStore for GatedStore {
        async fn create_conversation(&self, persona_id: &str) -> Result<Conversation> {
            self.inner.create_conversation(persona_id).await
        }

        async fn append_message(
            &self,
            conversation_id: &str,
            role: Role,
            content: &str,
            audio_url: Option<String>,
            persona_id: Option<String>,
        ) -> Result<Message> {
            if role == Role::Assistant {
                self.parked.send_modify(|n| *n += 1);
                self.permits.acquire().await.unwrap().forget();
            }
            self.inner
                .append_message(conversation_id, role, content, audio_url, persona_id)
                .await
        }

        async fn get_conversation(&self, id: &str) -> Result<Option<ConversationWithMessages>> {
            self.inner.get_conversation(id).await
        }

        async fn set_persona(&self, conversation_id: &str, persona_id: &str) -> Result<()> {
            self.inner.set_persona(conversation_id, persona_id).await
        }
    }

    struct Harness {
        session: VoiceSessionController,
        mic: Arc<FakeMic>,
        stt: Arc<FixedStt>,
        synth: Arc<FixedSynth>,
        playback: Arc<PlaybackManager>,
        store: Arc<MemoryConversationStore>,
        gate: Option<Arc<GatedStore>>,
    }

    struct Setup {
        recording_bytes: usize,
        transcript: std::result::Result<&'static str, &'static str>,
        reply: Option<&'static str>,
        synth_fails: bool,
        sink: Arc<FakeSink>,
        gate_replies: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                recording_bytes: 1500,
                transcript: Ok("What should I read?"),
                reply: Some("Read what you love until you love to read."),
                synth_fails: false,
                sink: FakeSink::instant(),
                gate_replies: false,
            }
        }
    }

    fn persona(slug: &str, voice: Option<&str>) -> Persona {
        NewPersona {
            slug: slug.into(),
            name: slug.into(),
            system_prompt: format!("You are {slug}."),
            voice_id: voice.map(str::to_string),
            ..Default::default()
        }
        .into_persona()
    }

    async fn harness(setup: Setup) -> Harness {
        let mic = FakeMic::with_bytes(setup.recording_bytes);
        let stt = Arc::new(FixedStt(setup.transcript, AtomicUsize::new(0)));
        let synth = Arc::new(FixedSynth {
            fail: setup.synth_fails,
            voices: Mutex::new(Vec::new()),
        });
        let playback = Arc::new(isolated_playback(setup.sink));
        let store = Arc::new(MemoryConversationStore::new());
        let gate = setup
            .gate_replies
            .then(|| Arc::new(GatedStore::new(store.clone())));
        let conversations: Arc<dyn ConversationStore> = match &gate {
            Some(gate) => gate.clone(),
            None => store.clone(),
        };

        let naval = persona("naval", Some("navalVoice"));
        let conversation = store.create_conversation(&naval.id).await.unwrap();

        let pipeline = Arc::new(VoicePipeline {
            transcription: TranscriptionClient::new(vec![stt.clone()]),
            generator: ResponseGenerator::new(Arc::new(FixedChat(setup.reply)), "test-model"),
            synthesis: SpeechSynthesisClient::new(Some(synth.clone())),
            playback: playback.clone(),
            conversations,
        });
        let session = VoiceSessionController::new(
            pipeline,
            isolated_capture(mic.clone()),
            conversation.id,
            naval,
        );

        Harness {
            session,
            mic,
            stt,
            synth,
            playback,
            store,
            gate,
        }
    }

    async fn messages(h: &Harness) -> Vec<persona_voice_core::types::Message> {
        h.store
            .get_conversation(h.session.conversation_id())
            .await
            .unwrap()
            .unwrap()
            .messages
    }

    #[tokio::test]
    async fn test_happy_path_turn_relistens() {
        let h = harness(Setup::default()).await;

        assert!(matches!(h.session.toggle().await.unwrap(), Trigger::Started));
        assert_eq!(h.session.state(), VoiceState::Listening);

        let Trigger::Completed(turn) = h.session.toggle().await.unwrap() else {
            panic!("expected a completed turn");
        };
        assert_eq!(turn.transcript, "What should I read?");
        assert_eq!(turn.reply, "Read what you love until you love to read.");
        assert!(turn.audio.is_some());
        assert!(turn.relistening);

        // Hands-free: back to listening with the microphone open again.
        assert_eq!(h.session.state(), VoiceState::Listening);
        assert!(h.session.is_recording());
        assert!(h.mic.is_open());

        let msgs = messages(&h).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "What should I read?");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].persona_id.as_deref(), Some(h.session.persona().id.as_str()));
        assert!(msgs[1].audio_url.as_deref().unwrap().starts_with("data:audio/mpeg;base64,"));
        assert_eq!(h.synth.voices.lock().unwrap()[0], "navalVoice");
        assert!(h.session.notice().is_none());
    }

    #[tokio::test]
    async fn test_short_recording_never_transcribed() {
        let h = harness(Setup {
            recording_bytes: 400,
            ..Default::default()
        })
        .await;

        h.session.start_listening().await.unwrap();
        let err = h.session.stop_and_process().await.unwrap_err();
        assert!(matches!(err, VoiceError::RecordingTooShort { .. }));

        assert_eq!(h.stt.1.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.notice().unwrap().message, "Recording too short");
        assert!(messages(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_speech_returns_to_idle_without_messages() {
        let h = harness(Setup {
            transcript: Ok("  "),
            ..Default::default()
        })
        .await;

        h.session.start_listening().await.unwrap();
        let err = h.session.stop_and_process().await.unwrap_err();
        assert!(matches!(err, VoiceError::NoSpeechDetected));
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert!(!h.mic.is_open());
        assert!(messages(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_transcription_outage_posts_notice() {
        let h = harness(Setup {
            transcript: Err("503"),
            ..Default::default()
        })
        .await;

        h.session.start_listening().await.unwrap();
        let err = h.session.stop_and_process().await.unwrap_err();
        assert!(matches!(err, VoiceError::TranscriptionUnavailable(_)));
        assert_eq!(
            h.session.notice().unwrap().message,
            "Speech-to-text service unavailable"
        );
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_generation_failure_speaks_apology() {
        let h = harness(Setup {
            reply: None,
            ..Default::default()
        })
        .await;

        h.session.start_listening().await.unwrap();
        let Trigger::Completed(turn) = h.session.stop_and_process().await.unwrap() else {
            panic!("expected a completed turn");
        };
        assert_eq!(turn.reply, persona_voice_agent::APOLOGY_REPLY);
        assert_eq!(messages(&h).await[1].content, persona_voice_agent::APOLOGY_REPLY);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_text_only() {
        let h = harness(Setup {
            synth_fails: true,
            ..Default::default()
        })
        .await;

        h.session.start_listening().await.unwrap();
        let Trigger::Completed(turn) = h.session.stop_and_process().await.unwrap() else {
            panic!("expected a completed turn");
        };
        assert!(turn.audio.is_none());
        assert!(!turn.relistening);
        assert_eq!(h.session.state(), VoiceState::Idle);

        let msgs = messages(&h).await;
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].audio_url.is_none());
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let store = Arc::new(MemoryConversationStore::new());
        let naval = persona("naval", None);
        let conversation = store.create_conversation(&naval.id).await.unwrap();
        let pipeline = Arc::new(VoicePipeline {
            transcription: TranscriptionClient::new(Vec::new()),
            generator: ResponseGenerator::new(Arc::new(FixedChat(Some("hi"))), "m"),
            synthesis: SpeechSynthesisClient::new(None),
            playback: Arc::new(isolated_playback(FakeSink::instant())),
            conversations: store,
        });
        let session = VoiceSessionController::new(
            pipeline,
            isolated_capture(FakeMic::denied()),
            conversation.id,
            naval,
        );

        let err = session.start_listening().await.unwrap_err();
        assert!(matches!(err, VoiceError::PermissionDenied(_)));
        assert_eq!(session.state(), VoiceState::Idle);
        assert_eq!(session.notice().unwrap().message, "Failed to access microphone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_ignored_while_talking() {
        let h = Arc::new(
            harness(Setup {
                sink: FakeSink::endless(),
                ..Default::default()
            })
            .await,
        );

        h.session.start_listening().await.unwrap();
        let turn = {
            let h = h.clone();
            tokio::spawn(async move { h.session.stop_and_process().await })
        };

        let mut state = h.session.subscribe_state();
        state.wait_for(|s| *s == VoiceState::Talking).await.unwrap();

        assert!(matches!(h.session.toggle().await.unwrap(), Trigger::Ignored));
        assert!(matches!(h.session.start_listening().await.unwrap(), Trigger::Ignored));
        assert_eq!(h.session.state(), VoiceState::Talking);
        assert!(!h.session.is_recording());

        h.session.close();
        assert!(matches!(turn.await.unwrap(), Err(VoiceError::StaleResponse)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_talking_releases_everything() {
        let h = Arc::new(
            harness(Setup {
                sink: FakeSink::endless(),
                ..Default::default()
            })
            .await,
        );

        h.session.start_listening().await.unwrap();
        let turn = {
            let h = h.clone();
            tokio::spawn(async move { h.session.stop_and_process().await })
        };
        h.session
            .subscribe_state()
            .wait_for(|s| *s == VoiceState::Talking)
            .await
            .unwrap();
        assert!(h.playback.is_playing());

        h.session.close();
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert!(!h.playback.is_playing());

        assert!(matches!(turn.await.unwrap(), Err(VoiceError::StaleResponse)));
        assert!(!h.playback.is_playing());
        assert!(!h.session.is_recording());
        assert!(!h.mic.is_open());
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_close_while_listening_releases_microphone() {
        let h = harness(Setup::default()).await;

        h.session.start_listening().await.unwrap();
        assert!(h.mic.is_open());

        h.session.close();
        tokio::task::yield_now().await;
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert!(!h.session.is_recording());
        assert!(!h.mic.is_open());

        // The closed session can be reopened from Idle.
        assert!(matches!(h.session.start_listening().await.unwrap(), Trigger::Started));
    }

    #[tokio::test]
    async fn test_switch_persona_changes_voice_and_attribution() {
        let h = harness(Setup::default()).await;
        let elon = persona("elon", None);
        h.session.switch_persona(elon.clone()).await.unwrap();

        h.session.start_listening().await.unwrap();
        h.session.stop_and_process().await.unwrap();

        let msgs = messages(&h).await;
        assert_eq!(msgs[1].persona_id.as_deref(), Some(elon.id.as_str()));
        assert_eq!(
            h.synth.voices.lock().unwrap()[0],
            crate::tts::DEFAULT_FALLBACK_VOICE
        );
        let conversation = h
            .store
            .get_conversation(h.session.conversation_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.conversation.persona_id, elon.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_clears_after_ttl() {
        let h = harness(Setup {
            recording_bytes: 10,
            ..Default::default()
        })
        .await;

        h.session.start_listening().await.unwrap();
        let _ = h.session.stop_and_process().await;
        assert!(h.session.notice().is_some());

        let mut notices = h.session.subscribe_notices();
        tokio::time::sleep(Duration::from_secs(4)).await;
        notices.wait_for(Option::is_none).await.unwrap();
        assert!(h.session.notice().is_none());
    }

    #[tokio::test]
    async fn test_closed_turn_cannot_touch_next_turn_state() {
        let h = Arc::new(
            harness(Setup {
                gate_replies: true,
                ..Default::default()
            })
            .await,
        );
        let gate = h.gate.clone().unwrap();

        h.session.start_listening().await.unwrap();
        let first = {
            let h = h.clone();
            tokio::spawn(async move { h.session.stop_and_process().await })
        };
        gate.wait_parked(1).await;

        h.session.close();
        assert!(matches!(h.session.start_listening().await.unwrap(), Trigger::Started));
        let second = {
            let h = h.clone();
            tokio::spawn(async move { h.session.stop_and_process().await })
        };
        gate.wait_parked(2).await;
        assert_eq!(h.session.state(), VoiceState::Processing);

        // The closed turn finishes its store write and must leave the new turn alone.
        gate.release_one();
        assert!(matches!(first.await.unwrap(), Err(VoiceError::StaleResponse)));
        assert_eq!(h.session.state(), VoiceState::Processing);

        gate.release_one();
        let Trigger::Completed(turn) = second.await.unwrap().unwrap() else {
            panic!("expected the new turn to complete");
        };
        assert!(turn.relistening);
        assert_eq!(h.session.state(), VoiceState::Listening);

        h.session.close();
    }
}
