use thiserror::Error;

/// Errors from the session handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The session task has terminated; commands go nowhere.
    #[error("session task has terminated")]
    Closed,
}
