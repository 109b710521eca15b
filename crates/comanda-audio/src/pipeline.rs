//! The per-session audio pipeline: one capture source, a recording
//! gate, and the stop-recording commit sequence.
//!
//! The pipeline never talks to the transport. `stop_recording` hands
//! back a [`StopSequence`] directive and the session engine performs
//! the actual `input_audio_buffer.commit` / `response.create` sends,
//! running the create through the in-flight response guard.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::capture::AudioSource;
use crate::error::AudioError;
use crate::resample::resample_linear;
use crate::vad::{EnergyVad, VadConfig};

/// Audio pipeline tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Protocol sample rate frames are resampled to.
    #[serde(default = "default_target_rate")]
    pub target_rate: u32,
    /// Capture frame length in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    /// Window within which a second `stop_recording` is ignored
    /// entirely.
    #[serde(default = "default_stop_debounce_ms")]
    pub stop_debounce_ms: u64,
    /// Fixed delay between the buffer commit and the response request.
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    /// Voice-activity detection tuning (UI feedback only).
    #[serde(default)]
    pub vad: VadConfig,
}

fn default_target_rate() -> u32 {
    24_000
}

fn default_frame_ms() -> u64 {
    20
}

fn default_stop_debounce_ms() -> u64 {
    500
}

fn default_response_delay_ms() -> u64 {
    250
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_rate: default_target_rate(),
            frame_ms: default_frame_ms(),
            stop_debounce_ms: default_stop_debounce_ms(),
            response_delay_ms: default_response_delay_ms(),
            vad: VadConfig::default(),
        }
    }
}

impl AudioConfig {
    /// The stop-recording debounce window.
    pub fn stop_debounce(&self) -> Duration {
        Duration::from_millis(self.stop_debounce_ms)
    }

    /// The commit-to-response delay.
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}

/// One conditioned frame from the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono samples at the protocol rate.
    pub samples: Vec<f32>,
    /// Smoothed voice-activity decision for this frame.
    pub voice_active: bool,
    /// Whether the recording gate was open when the frame arrived.
    pub transmit: bool,
}

/// Directive returned by a successful `stop_recording`.
///
/// The caller sends `input_audio_buffer.commit`, waits
/// `response_delay`, then issues `response.create` through the
/// in-flight response guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSequence {
    /// Delay between commit and response request.
    pub response_delay: Duration,
}

/// Per-session capture pipeline with push-to-record gating.
pub struct AudioPipeline {
    config: AudioConfig,
    source: Box<dyn AudioSource>,
    frames: Option<mpsc::UnboundedReceiver<Vec<f32>>>,
    vad: EnergyVad,
    recording: bool,
    last_stop: Option<Instant>,
}

impl AudioPipeline {
    /// Creates a pipeline over a capture source. The source is not
    /// started until [`AudioPipeline::acquire`].
    pub fn new(source: Box<dyn AudioSource>, config: AudioConfig) -> Self {
        let vad = EnergyVad::new(&config.vad);
        Self {
            config,
            source,
            frames: None,
            vad,
            recording: false,
            last_stop: None,
        }
    }

    /// Starts the capture source. One acquisition per session.
    pub fn acquire(&mut self) -> Result<(), AudioError> {
        if self.frames.is_some() {
            return Err(AudioError::AlreadyAcquired);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.source.start(tx)?;
        self.frames = Some(rx);
        Ok(())
    }

    /// Stops the source and drops any queued frames. Idempotent.
    pub fn release(&mut self) {
        self.source.stop();
        self.frames = None;
        self.recording = false;
        self.vad.reset();
    }

    /// Whether the recording gate is open.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether a capture source is currently acquired.
    pub fn is_acquired(&self) -> bool {
        self.frames.is_some()
    }

    /// Opens the recording gate. Returns `false` if it was already
    /// open.
    pub fn start_recording(&mut self) -> bool {
        if self.recording {
            return false;
        }
        self.recording = true;
        true
    }

    /// Closes the recording gate and returns the commit directive.
    ///
    /// Returns `None` when nothing was recording or when this stop
    /// falls inside the debounce window of the previous one; a
    /// debounced stop is ignored entirely so it can never produce a
    /// second commit/response pair.
    pub fn stop_recording(&mut self) -> Option<StopSequence> {
        if !self.recording {
            return None;
        }
        if let Some(last) = self.last_stop {
            if last.elapsed() < self.config.stop_debounce() {
                debug!("stop_recording ignored inside debounce window");
                return None;
            }
        }
        self.recording = false;
        self.last_stop = Some(Instant::now());
        Some(StopSequence {
            response_delay: self.config.response_delay(),
        })
    }

    /// Receives the next conditioned frame, or `None` when the source
    /// has ended or was never acquired.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        let rx = self.frames.as_mut()?;
        let raw = rx.recv().await?;
        let samples = resample_linear(&raw, self.source.sample_rate(), self.config.target_rate);
        let voice_active = self.vad.process_frame(&samples);
        Some(AudioFrame {
            samples,
            voice_active,
            transmit: self.recording,
        })
    }
}
