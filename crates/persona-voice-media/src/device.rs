//! Audio device seams: microphone input and audio output.
//!
//! The pipeline only talks to these traits. File-backed implementations are
//! provided for the CLI and for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::tts::AudioResource;

/// A microphone that can be opened for one recording at a time.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Open the input. An error means access was declined or no input exists.
    async fn open(&self) -> anyhow::Result<Box<dyn MicStream>>;
}

/// An open microphone. Dropping it releases the device.
#[async_trait]
pub trait MicStream: Send {
    /// Declared container encoding of the chunks, e.g. `audio/webm`.
    fn mime_type(&self) -> &str;

    /// Next encoded chunk, or `None` once the input has ended.
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;
}

/// Audio output.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play to completion. Dropping the returned future stops playback.
    async fn play(&self, audio: &AudioResource) -> anyhow::Result<()>;

    /// Silence the output now, without waiting for the `play` future to be dropped.
    fn stop(&self) {}
}

const FILE_CHUNK_SIZE: usize = 4096;

/// How often a running player process is checked for exit.
const PLAYER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serves one queued audio file per `open()`, in order.
///
/// Each open consumes the next file. Once the queue is empty the input still
/// opens but stays silent, like a live microphone nobody is speaking into.
pub struct FileMicrophone {
    queue: Mutex<VecDeque<PathBuf>>,
    drained: Arc<Notify>,
    open_streams: Arc<AtomicUsize>,
}

impl FileMicrophone {
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            queue: Mutex::new(files.into_iter().collect()),
            drained: Arc::new(Notify::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Resolves once the currently open file has been read to the end.
    pub async fn wait_drained(&self) {
        self.drained.notified().await;
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Number of streams that have been opened and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

/// Mime type for a recording file, by extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        _ => "audio/webm",
    }
}

#[async_trait]
impl Microphone for FileMicrophone {
    async fn open(&self) -> anyhow::Result<Box<dyn MicStream>> {
        let next = self
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("microphone queue poisoned"))?
            .pop_front();
        let Some(path) = next else {
            debug!("Recording queue empty, opening silent input");
            self.open_streams.fetch_add(1, Ordering::SeqCst);
            return Ok(Box::new(FileMicStream {
                mime_type: "audio/webm",
                file: None,
                silent: true,
                drained: self.drained.clone(),
                open_streams: self.open_streams.clone(),
            }));
        };

        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("opening recording input {}", path.display()))?;
        debug!(path = %path.display(), "Opened recording input");

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FileMicStream {
            mime_type: mime_for_path(&path),
            file: Some(file),
            silent: false,
            drained: self.drained.clone(),
            open_streams: self.open_streams.clone(),
        }))
    }
}

struct FileMicStream {
    mime_type: &'static str,
    file: Option<tokio::fs::File>,
    silent: bool,
    drained: Arc<Notify>,
    open_streams: Arc<AtomicUsize>,
}

#[async_trait]
impl MicStream for FileMicStream {
    fn mime_type(&self) -> &str {
        self.mime_type
    }

    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.silent {
            return std::future::pending().await;
        }
        let file = self.file.as_mut()?;
        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(n) if n > 0 => {
                buf.truncate(n);
                Some(buf)
            }
            _ => {
                self.file = None;
                self.drained.notify_one();
                None
            }
        }
    }
}

impl Drop for FileMicStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Writes every played reply to a directory, optionally handing it to an
/// external player command (e.g. `ffplay -nodisp -autoexit`).
pub struct FileSink {
    out_dir: PathBuf,
    player: Option<Vec<String>>,
    counter: AtomicUsize,
    /// Running player process, tagged with its reply number.
    current: Mutex<Option<(usize, Child)>>,
}

impl FileSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            player: None,
            counter: AtomicUsize::new(0),
            current: Mutex::new(None),
        }
    }

    /// Player command line; the audio file path is appended as the last argument.
    pub fn with_player(mut self, command: &str) -> Self {
        let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        self.player = (!parts.is_empty()).then_some(parts);
        self
    }

    fn extension(mime_type: &str) -> &'static str {
        match mime_type {
            "audio/wav" | "audio/x-wav" => "wav",
            "audio/ogg" => "ogg",
            _ => "mp3",
        }
    }

    fn lock_player(&self) -> std::sync::MutexGuard<'_, Option<(usize, Child)>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop (and so kill) the player for reply `n`, if it is still the current one.
    fn kill_player(&self, n: usize) {
        let mut current = self.lock_player();
        if current.as_ref().is_some_and(|(id, _)| *id == n) {
            current.take();
            debug!(reply = n, "Player stopped");
        }
    }

    pub fn is_player_running(&self) -> bool {
        self.lock_player().is_some()
    }

    async fn run_player(&self, n: usize, program: &str, args: &[String], path: &Path) -> anyhow::Result<()> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .arg(path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("running player {program}"))?;
        // Replacing an older player kills it.
        *self.lock_player() = Some((n, child));
        let _guard = PlayerGuard { sink: self, n };

        loop {
            {
                let mut current = self.lock_player();
                let Some((id, child)) = current.as_mut().filter(|(id, _)| *id == n) else {
                    // Stopped from outside.
                    return Ok(());
                };
                if let Some(status) = child.try_wait()? {
                    debug!(reply = *id, %status, "Player exited");
                    current.take();
                    if !status.success() {
                        anyhow::bail!("player {program} exited with {status}");
                    }
                    return Ok(());
                }
            }
            tokio::time::sleep(PLAYER_POLL_INTERVAL).await;
        }
    }
}

/// Kills the player when the `play` future is dropped mid-playback.
struct PlayerGuard<'a> {
    sink: &'a FileSink,
    n: usize,
}

impl Drop for PlayerGuard<'_> {
    fn drop(&mut self) {
        self.sink.kill_player(self.n);
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, audio: &AudioResource) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self
            .out_dir
            .join(format!("reply-{n:03}.{}", Self::extension(&audio.mime_type)));
        tokio::fs::write(&path, &audio.bytes).await?;
        info!(path = %path.display(), bytes = audio.bytes.len(), "Reply audio written");

        if let Some((program, args)) = self.player.as_ref().and_then(|p| p.split_first()) {
            self.run_player(n, program, args, &path).await?;
        }
        Ok(())
    }

    fn stop(&self) {
        if let Some((n, mut child)) = self.lock_player().take() {
            if let Err(e) = child.start_kill() {
                warn!(%e, reply = n, "Failed to kill player");
            }
            debug!(reply = n, "Player killed");
        }
    }
}
