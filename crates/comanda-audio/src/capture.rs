//! Capture sources: where microphone frames come from.
//!
//! Production capture shells out to PulseAudio's `parec` and reads
//! 32-bit float mono samples from its stdout on a dedicated thread.
//! This keeps the crate free of native audio bindings while still
//! capturing a real microphone on any PulseAudio system.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AudioError;

/// Where captured frames are delivered. Unbounded so a slow consumer
/// never stalls the capture thread.
pub type FrameSink = mpsc::UnboundedSender<Vec<f32>>;

/// A source of mono `f32` audio frames at a fixed device rate.
pub trait AudioSource: Send {
    /// The rate frames are captured at, in Hz.
    fn sample_rate(&self) -> u32;

    /// Starts delivering frames into `sink` until stopped or the sink
    /// is dropped.
    fn start(&mut self, sink: FrameSink) -> Result<(), AudioError>;

    /// Stops capture and releases the device.
    fn stop(&mut self);
}

fn pulse_server() -> String {
    std::env::var("PULSE_SERVER").unwrap_or_default()
}

/// Microphone capture via a `parec` subprocess.
pub struct ParecSource {
    sample_rate: u32,
    frame_samples: usize,
    child: Option<Child>,
}

impl ParecSource {
    /// Creates a source capturing at `sample_rate` with frames of
    /// `frame_ms` milliseconds.
    pub fn new(sample_rate: u32, frame_ms: u64) -> Self {
        let frame_samples = ((sample_rate as u64 * frame_ms) / 1000).max(1) as usize;
        Self {
            sample_rate,
            frame_samples,
            child: None,
        }
    }
}

impl AudioSource for ParecSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), AudioError> {
        if self.child.is_some() {
            return Err(AudioError::AlreadyAcquired);
        }

        let mut child = Command::new("parec")
            .args([
                "--format=float32le",
                &format!("--rate={}", self.sample_rate),
                "--channels=1",
            ])
            .env("PULSE_SERVER", pulse_server())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AudioError::DeviceUnavailable(format!("parec failed: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AudioError::CaptureFailed("parec stdout unavailable".into()))?;

        let frame_bytes = self.frame_samples * 4;
        std::thread::spawn(move || {
            let mut reader = std::io::BufReader::new(stdout);
            let mut buf = vec![0u8; frame_bytes];
            while reader.read_exact(&mut buf).is_ok() {
                let samples: Vec<f32> = buf
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                if sink.send(samples).is_err() {
                    break;
                }
            }
            debug!("parec capture thread finished");
        });

        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill parec");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for ParecSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A source that produces silent frames on a timer. Useful for driving
/// a session on machines without a microphone.
pub struct SilenceSource {
    sample_rate: u32,
    frame_samples: usize,
    frame_interval: Duration,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
}

impl SilenceSource {
    /// Creates a silent source matching `sample_rate`/`frame_ms`.
    pub fn new(sample_rate: u32, frame_ms: u64) -> Self {
        Self {
            sample_rate,
            frame_samples: ((sample_rate as u64 * frame_ms) / 1000).max(1) as usize,
            frame_interval: Duration::from_millis(frame_ms.max(1)),
            stop_tx: None,
        }
    }
}

impl AudioSource for SilenceSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), AudioError> {
        if self.stop_tx.is_some() {
            return Err(AudioError::AlreadyAcquired);
        }
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let frame = vec![0.0f32; self.frame_samples];
        let interval = self.frame_interval;
        std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if sink.send(frame.clone()).is_err() {
                        break;
                    }
                }
            }
        });
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_tx = None;
    }
}
