use thiserror::Error;

/// Errors raised while decoding or normalizing protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or carried an unknown `type` tag.
    #[error("failed to decode protocol frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// An audio delta carried a payload that was not valid base64.
    #[error("invalid audio payload: {0}")]
    AudioPayload(#[from] base64::DecodeError),
}
