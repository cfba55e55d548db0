//! Microphone capture into a single compressed recording.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use persona_voice_core::config::Config;
use persona_voice_core::error::{Result, VoiceError};
use persona_voice_core::types::AudioArtifact;

use crate::device::{MicStream, Microphone};
use crate::slot::{ExclusiveSlot, Lease};

/// Recordings below this many bytes are rejected.
pub const DEFAULT_MIN_RECORDING_BYTES: usize = 1000;

struct Recording {
    lease: Lease,
    mime_type: String,
    pump: JoinHandle<Vec<u8>>,
}

pub struct AudioCapture {
    microphone: Arc<dyn Microphone>,
    slot: Arc<ExclusiveSlot>,
    min_bytes: usize,
    active: Mutex<Option<Recording>>,
}

impl AudioCapture {
    /// Capture from `microphone` through the process-wide microphone slot:
    /// starting any capture preempts whichever other one holds the device.
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            slot: ExclusiveSlot::microphone(),
            min_bytes: DEFAULT_MIN_RECORDING_BYTES,
            active: Mutex::new(None),
        }
    }

    pub fn from_config(microphone: Arc<dyn Microphone>, config: &Config) -> Self {
        Self::new(microphone).with_min_bytes(config.min_recording_bytes())
    }

    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    /// Use a separate slot instead of the process-wide one.
    pub fn with_slot(mut self, slot: Arc<ExclusiveSlot>) -> Self {
        self.slot = slot;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.lock().is_some()
    }

    /// Open the microphone and start accumulating chunks.
    pub async fn start_listening(&self) -> Result<()> {
        if self.is_recording() {
            return Err(VoiceError::RecordingInProgress);
        }

        let stream = self.microphone.open().await.map_err(|e| {
            warn!(%e, "Microphone unavailable");
            VoiceError::PermissionDenied(e.to_string())
        })?;

        let mut active = self.lock();
        if active.is_some() {
            return Err(VoiceError::RecordingInProgress);
        }

        let lease = self.slot.acquire();
        let mime_type = stream.mime_type().to_string();
        let pump = tokio::spawn(pump_chunks(stream, lease.clone()));
        info!(mime_type = %mime_type, lease = lease.id(), "Recording started");

        *active = Some(Recording {
            lease,
            mime_type,
            pump,
        });
        Ok(())
    }

    /// Finalize the recording into one artifact and release the device.
    pub async fn stop_listening(&self) -> Result<AudioArtifact> {
        let recording = self.lock().take().ok_or(VoiceError::NotRecording)?;
        recording.lease.token().cancel();

        let bytes = recording
            .pump
            .await
            .map_err(|e| VoiceError::Other(anyhow::anyhow!("recording task failed: {e}")))?;
        self.slot.release(&recording.lease);

        info!(bytes = bytes.len(), "Recording stopped");
        if bytes.len() < self.min_bytes {
            return Err(VoiceError::RecordingTooShort {
                size: bytes.len(),
                min: self.min_bytes,
            });
        }
        Ok(AudioArtifact::new(bytes, &recording.mime_type))
    }

    /// Abandon the recording, if any, and release the device immediately.
    pub fn cancel(&self) {
        if let Some(recording) = self.lock().take() {
            recording.lease.token().cancel();
            recording.pump.abort();
            self.slot.release(&recording.lease);
            debug!(lease = recording.lease.id(), "Recording cancelled");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Recording>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Read chunks until the lease is cancelled or the input ends, then collect
/// whatever is already buffered. Dropping the stream on return releases the device.
async fn pump_chunks(mut stream: Box<dyn MicStream>, lease: Lease) -> Vec<u8> {
    let token = lease.token();
    let mut bytes = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            chunk = stream.next_chunk() => match chunk {
                Some(chunk) => bytes.extend_from_slice(&chunk),
                None => return bytes,
            },
        }
    }

    while let Some(Some(chunk)) = stream.next_chunk().now_or_never() {
        bytes.extend_from_slice(&chunk);
    }
    bytes
}
