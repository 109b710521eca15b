use thiserror::Error;

use crate::credential::CredentialError;

/// Errors raised by negotiation, the data channel, and reconnection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The credential endpoint refused or returned garbage. Fatal for
    /// the session; a fresh session must be requested.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The credential expired before negotiation completed. Fatal for
    /// this attempt; a retry needs a fresh credential.
    #[error("credential expired before negotiation completed")]
    CredentialExpired,

    /// `connect()` was called on a session that is already connected.
    #[error("session is already connected")]
    AlreadyConnected,

    /// The offer/answer exchange failed.
    #[error("signaling exchange failed: {0}")]
    Signaling(String),

    /// The peer link reported a failure.
    #[error("peer link error: {0}")]
    Link(String),

    /// The network path and data channel did not become ready in time.
    #[error("negotiation timed out")]
    NegotiationTimeout,

    /// A send was attempted on a link whose channel is gone.
    #[error("data channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// Whether the reconnection controller may retry after this error.
    ///
    /// Credential problems are fatal: the secret is single-use and the
    /// session must be recreated. `AlreadyConnected` is a caller
    /// mistake, not a connection fault, and retrying it would be
    /// nonsense.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Credential(_) | Self::CredentialExpired | Self::AlreadyConnected => false,
            Self::Signaling(_) | Self::Link(_) | Self::NegotiationTimeout | Self::ChannelClosed => {
                true
            }
        }
    }
}
