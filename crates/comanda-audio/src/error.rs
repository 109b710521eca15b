use thiserror::Error;

/// Errors raised by microphone capture and the audio pipeline.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The capture device could not be opened (missing binary, no
    /// device, or permission denied). Requires user action.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A transient capture failure (short read, format hiccup).
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The pipeline already holds a capture source for this session.
    #[error("capture source already acquired")]
    AlreadyAcquired,

    /// An operation that needs a running source was called before
    /// `acquire`.
    #[error("capture source not acquired")]
    NotAcquired,
}

impl AudioError {
    /// Whether the failure may resolve on retry without user action.
    ///
    /// Device/permission problems are not retryable; format and buffer
    /// problems are.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::CaptureFailed(_))
    }
}
