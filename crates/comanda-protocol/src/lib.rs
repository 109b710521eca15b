//! Event protocol for the Comanda voice session data channel.
//!
//! Defines the wire schema (client and server frames as tagged enums),
//! the [`EventProtocolHandler`] that normalizes raw frames into
//! semantic events, and the protocol-health counters.
//!
//! The wire enums are matched exhaustively: a frame whose `type` is
//! unknown fails to decode and surfaces as a counted
//! [`ProtocolError`], never a silent no-op.

mod error;
mod events;
mod handler;
mod metrics;

pub use error::ProtocolError;
pub use events::{
    ClientEvent, ErrorDisposition, ResponseOptions, Role, ServerEvent, ServerSessionInfo,
    SessionSettings, classify_error_code,
};
pub use handler::{ActiveResponse, EventProtocolHandler, HandlerConfig, SemanticEvent, TranscriptEntry};
pub use metrics::{MetricsSnapshot, ProtocolMetrics};
