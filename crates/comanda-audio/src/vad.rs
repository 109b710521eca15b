//! Energy-based voice-activity detection.
//!
//! Classifies frames by RMS energy in dB and smooths the decision over
//! a sliding majority-vote window. Under push-to-talk control the
//! result drives UI feedback only; it never gates transmission.

use std::collections::VecDeque;

use serde::Deserialize;

/// Tuning for the energy detector.
#[derive(Debug, Clone, Deserialize)]
pub struct VadConfig {
    /// Frames at or above this RMS level count as speech.
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,
    /// Majority-vote window length, in frames.
    #[serde(default = "default_smoothing_frames")]
    pub smoothing_frames: usize,
}

fn default_threshold_db() -> f32 {
    -55.0
}

fn default_smoothing_frames() -> usize {
    3
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: default_threshold_db(),
            smoothing_frames: default_smoothing_frames(),
        }
    }
}

/// Sliding-window RMS energy detector.
#[derive(Debug)]
pub struct EnergyVad {
    threshold_db: f32,
    window: VecDeque<bool>,
    window_size: usize,
}

impl EnergyVad {
    /// Creates a detector from config.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold_db: config.threshold_db,
            window: VecDeque::new(),
            window_size: config.smoothing_frames.max(1),
        }
    }

    /// Classifies one frame, returning the smoothed speech decision.
    pub fn process_frame(&mut self, samples: &[f32]) -> bool {
        let raw = frame_db(samples) >= self.threshold_db;

        if self.window_size <= 1 {
            return raw;
        }
        self.window.push_back(raw);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let speech = self.window.iter().filter(|v| **v).count();
        let silence = self.window.len() - speech;
        match speech.cmp(&silence) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => raw,
        }
    }

    /// Forgets the smoothing history.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// RMS level of a frame in dBFS. Empty frames report deep silence.
fn frame_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    20.0 * rms.log10()
}
