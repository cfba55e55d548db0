//! Frequency-band levels for a bar visualizer, plus the cosmetic bar animator.
//!
//! The analysis follows the browser `AnalyserNode` model: Blackman window,
//! FFT magnitude scaled by 1/N, exponential smoothing across frames, then
//! decibels mapped linearly from `[min_db, max_db]` onto `0..=255`.

use std::collections::BTreeSet;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::voice_session::VoiceState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: 512,
            smoothing: 0.5,
            min_db: -90.0,
            max_db: -10.0,
        }
    }
}

impl AnalyserOptions {
    /// Settings for the single overall volume meter.
    pub fn volume_meter() -> Self {
        Self {
            fft_size: 32,
            smoothing: 0.0,
            ..Self::default()
        }
    }

    fn is_valid(&self) -> bool {
        self.fft_size.is_power_of_two()
            && (32..=32768).contains(&self.fft_size)
            && (0.0..=1.0).contains(&self.smoothing)
            && self.min_db < self.max_db
    }
}

pub struct BandAnalyzer {
    options: AnalyserOptions,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex32>,
}

impl BandAnalyzer {
    /// `None` when the options are out of range.
    pub fn new(options: AnalyserOptions) -> Option<Self> {
        if !options.is_valid() {
            return None;
        }
        let n = options.fft_size;
        let window = (0..n)
            .map(|i| {
                let x = i as f32 / n as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        Some(Self {
            options,
            fft: FftPlanner::<f32>::new().plan_fft_forward(n),
            window,
            smoothed: vec![0.0; n / 2],
            buffer: vec![Complex32::ZERO; n],
        })
    }

    pub fn bin_count(&self) -> usize {
        self.options.fft_size / 2
    }

    /// Byte frequency data for the most recent `fft_size` samples
    /// (zero-padded at the front when fewer are given).
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let n = self.options.fft_size;
        let recent = &samples[samples.len().saturating_sub(n)..];
        let pad = n - recent.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { recent[i - pad] };
            *slot = Complex32::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let tau = self.options.smoothing;
        let range = self.options.max_db - self.options.min_db;
        self.smoothed
            .iter_mut()
            .zip(&self.buffer)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() / n as f32;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                let db = 20.0 * smoothed.log10();
                let scaled = (255.0 / range) * (db - self.options.min_db);
                scaled.floor().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Average level per band, each in `0.0..=1.0`. Trailing bins that do not
    /// fill a whole band are ignored.
    pub fn band_levels(&mut self, samples: &[f32], bands: usize) -> Vec<f32> {
        let data = self.byte_frequency_data(samples);
        let band_size = if bands == 0 { 0 } else { data.len() / bands };
        if band_size == 0 {
            return vec![0.0; bands];
        }
        data.chunks_exact(band_size)
            .take(bands)
            .map(|band| average(band) / 255.0)
            .collect()
    }

    /// Overall level in `0.0..=1.0`.
    pub fn volume(&mut self, samples: &[f32]) -> f32 {
        let data = self.byte_frequency_data(samples);
        average(&data) / 255.0
    }
}

fn average(values: &[u8]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f32).sum::<f32>() / values.len() as f32
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualizerOptions {
    pub bands: usize,
    pub analyser: AnalyserOptions,
    pub update_interval: Duration,
}

impl Default for VisualizerOptions {
    fn default() -> Self {
        Self {
            bands: 15,
            analyser: AnalyserOptions::default(),
            update_interval: Duration::from_millis(32),
        }
    }
}

enum Source {
    Live(mpsc::Receiver<Vec<f32>>),
    Samples { samples: Arc<[f32]>, sample_rate: u32 },
}

/// Publishes band levels on a watch channel from a background ticker.
/// Dropping the handle stops the ticker.
pub struct Visualizer {
    levels: watch::Receiver<Vec<f32>>,
    _guard: DropGuard,
}

impl Visualizer {
    /// Analyse a live feed of PCM frames (mono, `-1.0..=1.0`).
    pub fn live(frames: mpsc::Receiver<Vec<f32>>, options: VisualizerOptions) -> Self {
        Self::spawn(Source::Live(frames), options)
    }

    /// Analyse a finished buffer, advancing through it in real time.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, options: VisualizerOptions) -> Self {
        Self::spawn(
            Source::Samples {
                samples: samples.into(),
                sample_rate,
            },
            options,
        )
    }

    pub fn levels(&self) -> Vec<f32> {
        self.levels.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<f32>> {
        self.levels.clone()
    }

    fn spawn(source: Source, options: VisualizerOptions) -> Self {
        let (tx, levels) = watch::channel(vec![0.0; options.bands]);
        let cancel = CancellationToken::new();

        match BandAnalyzer::new(options.analyser) {
            Some(analyzer) if !options.update_interval.is_zero() => {
                tokio::spawn(run_ticker(analyzer, source, options, tx, cancel.clone()));
            }
            _ => debug!(?options, "Visualizer options invalid, showing flat bars"),
        }

        Self {
            levels,
            _guard: cancel.drop_guard(),
        }
    }
}

async fn run_ticker(
    mut analyzer: BandAnalyzer,
    mut source: Source,
    options: VisualizerOptions,
    tx: watch::Sender<Vec<f32>>,
    cancel: CancellationToken,
) {
    let fft_size = options.analyser.fft_size;
    let mut interval = tokio::time::interval(options.update_interval);
    let mut window: Vec<f32> = Vec::with_capacity(fft_size * 2);
    let mut cursor = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let ended = match &mut source {
            Source::Live(frames) => {
                let mut closed = false;
                loop {
                    match frames.try_recv() {
                        Ok(frame) => window.extend_from_slice(&frame),
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            closed = true;
                            break;
                        }
                    }
                }
                if window.len() > fft_size {
                    window.drain(..window.len() - fft_size);
                }
                closed
            }
            Source::Samples { samples, sample_rate } => {
                let step = (*sample_rate as f64 * options.update_interval.as_secs_f64()) as usize;
                cursor = (cursor + step.max(1)).min(samples.len());
                window.clear();
                window.extend_from_slice(&samples[cursor.saturating_sub(fft_size)..cursor]);
                cursor >= samples.len()
            }
        };

        if ended {
            tx.send_replace(vec![0.0; options.bands]);
            break;
        }
        tx.send_replace(analyzer.band_levels(&window, options.bands));
    }
    debug!("Visualizer stopped");
}

/// Cosmetic bar animation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Connecting,
    Initializing,
    Listening,
    Speaking,
    Thinking,
}

impl From<VoiceState> for AnimationState {
    fn from(state: VoiceState) -> Self {
        match state {
            VoiceState::Idle => Self::Idle,
            VoiceState::Listening => Self::Listening,
            VoiceState::Processing => Self::Thinking,
            VoiceState::Talking => Self::Speaking,
        }
    }
}

/// Highlighted bar indices per tick: a sweep while connecting, random pulses
/// while thinking, nothing otherwise (live levels drive the bars then).
pub struct BarAnimator {
    state: AnimationState,
    columns: usize,
    index: usize,
}

impl BarAnimator {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(state: AnimationState, columns: usize) -> Self {
        Self {
            state,
            columns,
            index: 0,
        }
    }

    pub fn set_state(&mut self, state: AnimationState) {
        if state != self.state {
            self.state = state;
            self.index = 0;
        }
    }

    pub fn tick(&mut self) -> BTreeSet<usize> {
        if self.columns == 0 {
            return BTreeSet::new();
        }
        match self.state {
            AnimationState::Connecting | AnimationState::Initializing => {
                let highlighted = BTreeSet::from([self.index % self.columns]);
                self.index += 1;
                highlighted
            }
            AnimationState::Thinking => {
                let mut rng = rand::rng();
                let count = rng.random_range(1..=3);
                (0..count).map(|_| rng.random_range(0..self.columns)).collect()
            }
            AnimationState::Idle | AnimationState::Listening | AnimationState::Speaking => {
                BTreeSet::new()
            }
        }
    }
}
