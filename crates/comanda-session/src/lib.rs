//! The voice ordering session engine.
//!
//! Wires credential fetch, transport negotiation, the protocol
//! handler, the audio pipeline, reconnection supervision, and the
//! order bridge into a single per-session task. One logical event loop
//! per session: all entity mutation happens on that task, suspension
//! only at I/O boundaries.

mod config;
mod engine;
mod error;

pub use config::{
    resolve_generation, EngineConfig, GenerationRequest, RestaurantSettings,
};
pub use engine::{EngineDeps, SessionCommand, SessionEngine, SessionEvent, SessionHandle};
pub use error::EngineError;

// The transcript role rides in `SessionEvent`; re-exported so
// consumers do not need the protocol crate for it.
pub use comanda_protocol::Role;
