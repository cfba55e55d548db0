//! Process-wide playback: at most one audio resource plays at a time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use persona_voice_core::error::{Result, VoiceError};

use crate::device::AudioSink;
use crate::slot::{ExclusiveSlot, Lease};
use crate::tts::AudioResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Played to the end.
    Completed,
    /// Stopped early by `stop()`, by a newer playback, or by the caller's token.
    Stopped,
}

pub struct PlaybackManager {
    sink: Arc<dyn AudioSink>,
    slot: Arc<ExclusiveSlot>,
}

impl PlaybackManager {
    /// Playback through `sink`, sharing the process-wide playback slot.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            slot: ExclusiveSlot::playback(),
        }
    }

    pub fn with_slot(mut self, slot: Arc<ExclusiveSlot>) -> Self {
        self.slot = slot;
        self
    }

    /// Play `audio`, stopping whatever was playing before.
    ///
    /// Cancelling `cancel` stops this playback only.
    pub async fn play(&self, audio: &AudioResource, cancel: &CancellationToken) -> Result<PlaybackOutcome> {
        let lease = self.begin();
        self.play_leased(&lease, audio, cancel).await
    }

    /// Take the output ahead of `play_leased`, stopping whatever was playing.
    /// The lease can then be handed to `stop_lease` from synchronous code.
    pub fn begin(&self) -> Lease {
        self.slot.acquire()
    }

    pub async fn play_leased(
        &self,
        lease: &Lease,
        audio: &AudioResource,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome> {
        let preempted = lease.token();
        debug!(lease = lease.id(), bytes = audio.bytes.len(), "Playback started");

        let outcome = tokio::select! {
            biased;
            _ = preempted.cancelled() => Ok(PlaybackOutcome::Stopped),
            _ = cancel.cancelled() => Ok(PlaybackOutcome::Stopped),
            played = self.sink.play(audio) => played
                .map(|()| PlaybackOutcome::Completed)
                .map_err(|e| {
                    warn!(%e, "Playback failed");
                    VoiceError::Playback(e.to_string())
                }),
        };

        self.slot.release(lease);
        debug!(lease = lease.id(), ?outcome, "Playback finished");
        outcome
    }

    /// Stop the playback started under `lease`, if it is still the one playing.
    /// Takes effect immediately, without waiting for the playing task.
    pub fn stop_lease(&self, lease: &Lease) {
        if self.slot.revoke(lease) {
            self.sink.stop();
        }
    }

    /// Stop the current playback, if any.
    pub fn stop(&self) {
        self.slot.preempt();
        self.sink.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.slot.is_held()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    /// Output that takes `duration` to play and records what it played.
    pub(crate) struct FakeSink {
        pub duration: Option<Duration>,
        pub fail: bool,
        pub played: Mutex<Vec<AudioResource>>,
    }

    impl FakeSink {
        pub fn instant() -> Arc<Self> {
            Arc::new(Self {
                duration: None,
                fail: false,
                played: Mutex::new(Vec::new()),
            })
        }

        /// Never finishes on its own.
        pub fn endless() -> Arc<Self> {
            Arc::new(Self {
                duration: Some(Duration::from_secs(3600)),
                fail: false,
                played: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AudioSink for FakeSink {
        async fn play(&self, audio: &AudioResource) -> anyhow::Result<()> {
            self.played.lock().unwrap().push(audio.clone());
            if self.fail {
                anyhow::bail!("decode error");
            }
            if let Some(duration) = self.duration {
                tokio::time::sleep(duration).await;
            }
            Ok(())
        }
    }

    fn audio(tag: u8) -> AudioResource {
        AudioResource::new(vec![tag; 4], "audio/mpeg")
    }

    /// A manager with its own slot, so tests do not share the process-wide output.
    pub(crate) fn isolated(sink: Arc<FakeSink>) -> PlaybackManager {
        PlaybackManager::new(sink).with_slot(Arc::new(ExclusiveSlot::new("playback")))
    }

    #[tokio::test]
    async fn test_play_to_completion() {
        let sink = FakeSink::instant();
        let playback = isolated(sink.clone());

        let outcome = playback.play(&audio(1), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert!(!playback.is_playing());
        assert_eq!(sink.played.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_playback_stops_previous() {
        let playback = Arc::new(isolated(FakeSink::endless()));

        let first = {
            let playback = playback.clone();
            tokio::spawn(async move { playback.play(&audio(1), &CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        assert!(playback.is_playing());

        let second = {
            let playback = playback.clone();
            tokio::spawn(async move { playback.play(&audio(2), &CancellationToken::new()).await })
        };
        assert_eq!(first.await.unwrap().unwrap(), PlaybackOutcome::Stopped);
        assert!(playback.is_playing());

        playback.stop();
        assert_eq!(second.await.unwrap().unwrap(), PlaybackOutcome::Stopped);
        assert!(!playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_token_stops_playback() {
        let playback = isolated(FakeSink::endless());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = playback.play(&audio(1), &cancel).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_sink_error_is_playback_error() {
        let sink = Arc::new(FakeSink {
            duration: None,
            fail: true,
            played: Mutex::new(Vec::new()),
        });
        let playback = isolated(sink);
        let err = playback.play(&audio(1), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, VoiceError::Playback(_)));
        assert!(!playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lease_is_immediate() {
        let playback = Arc::new(isolated(FakeSink::endless()));
        let lease = playback.begin();
        let task = {
            let playback = playback.clone();
            let lease = lease.clone();
            tokio::spawn(async move {
                playback
                    .play_leased(&lease, &audio(1), &CancellationToken::new())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(playback.is_playing());

        playback.stop_lease(&lease);
        assert!(!playback.is_playing());
        assert_eq!(task.await.unwrap().unwrap(), PlaybackOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stale_stop_lease_keeps_newer_playback() {
        let playback = isolated(FakeSink::endless());
        let old = playback.begin();
        let current = playback.begin();

        playback.stop_lease(&old);
        assert!(playback.is_playing());
        assert!(!current.is_preempted());
    }
}
