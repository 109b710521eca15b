//! Microphone capture and audio conditioning for voice sessions.
//!
//! The pipeline acquires one capture source per session, resamples
//! captured frames to the protocol rate, runs lightweight
//! voice-activity detection for UI feedback, and gates transmission
//! with push-to-record control. Recording control never tears the
//! source down; it only flips the gate.

mod capture;
mod error;
mod pipeline;
mod resample;
mod vad;

pub use capture::{AudioSource, FrameSink, ParecSource, SilenceSource};
pub use error::AudioError;
pub use pipeline::{AudioConfig, AudioFrame, AudioPipeline, StopSequence};
pub use resample::{adjust_frame_length, f32_to_pcm16, pcm16_to_f32, resample_linear};
pub use vad::{EnergyVad, VadConfig};
