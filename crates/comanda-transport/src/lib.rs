//! Peer transport for voice sessions.
//!
//! Covers the connection credential, the offer/answer negotiation
//! exchange, the media+data link seam, the ordered outbound message
//! queue, and reconnection supervision.
//!
//! The link itself is a trait (`MediaLink`) with events delivered over
//! a typed channel rather than registered callbacks, so consumer
//! identity churn can never tear a connection down. [`LoopbackLink`]
//! is the in-process implementation used by tests and local
//! development; the `webrtc` cargo feature enables the real
//! peer-connection binding.

mod connection;
mod credential;
mod error;
mod link;
mod reconnect;
mod signaling;
#[cfg(feature = "webrtc")]
mod webrtc_link;

pub use connection::TransportConnection;
pub use credential::{
    CredentialError, CredentialProvider, HttpCredentialProvider, SessionCredential,
    StaticCredentialProvider,
};
pub use error::TransportError;
pub use link::{
    LinkEvent, LinkEvents, LinkProvider, LoopbackLink, LoopbackProvider, LoopbackRemote, MediaLink,
};
pub use reconnect::{ReconnectPolicy, ReconnectionController};
pub use signaling::{AnswerExchange, HttpSignaling, StaticSignaling};
#[cfg(feature = "webrtc")]
pub use webrtc_link::{WebRtcLink, WebRtcLinkConfig, WebRtcProvider};
