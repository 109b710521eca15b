//! Connection state machine for a voice session.
//!
//! Exactly one state is active per session. Transitions are legal only
//! along the edges encoded in [`ConnectionState::can_transition_to`];
//! callers are expected to refuse (and log) anything else rather than
//! force the state.

use serde::{Deserialize, Serialize};

/// The connection/conversation state of a session.
///
/// The nominal per-turn cycle is
/// `listening → processing → transcribing → order_processing →
/// response_generation|clarification → audio_playback → ready`.
/// Barge-in detours through `interrupted`, failures through
/// `error → recovering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection. Initial state; also the result of teardown.
    Disconnected,
    /// Negotiation in flight.
    Connecting,
    /// Network path and data channel established.
    Connected,
    /// Initial session configuration sent, awaiting acknowledgment.
    SessionSetup,
    /// Configured and able to start a turn.
    Ready,
    /// Connected but not recording.
    Idle,
    /// Microphone gate open, streaming audio.
    Listening,
    /// User turn committed, awaiting the model.
    Processing,
    /// Transcription deltas arriving.
    Transcribing,
    /// An order intent is being applied.
    OrderProcessing,
    /// The model is generating a response.
    ResponseGeneration,
    /// The model needs more information from the user.
    Clarification,
    /// Response audio is playing back.
    AudioPlayback,
    /// User barged in over playback.
    Interrupted,
    /// A failure occurred; recovery not yet started.
    Error,
    /// Reconnection/backoff in progress.
    Recovering,
}

impl ConnectionState {
    /// Returns the wire/display label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::SessionSetup => "session_setup",
            Self::Ready => "ready",
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Transcribing => "transcribing",
            Self::OrderProcessing => "order_processing",
            Self::ResponseGeneration => "response_generation",
            Self::Clarification => "clarification",
            Self::AudioPlayback => "audio_playback",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
            Self::Recovering => "recovering",
        }
    }

    /// Whether moving from `self` to `next` follows a legal edge.
    ///
    /// A same-state "transition" is always legal (and a no-op for
    /// callers). Explicit teardown to [`ConnectionState::Disconnected`]
    /// and failure into [`ConnectionState::Error`] are legal from any
    /// state.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self == next {
            return true;
        }
        // Teardown and failure edges exist from every state.
        if next == Disconnected || next == Error {
            return true;
        }

        match (self, next) {
            (Connecting, Connected) => true,
            (Connected, SessionSetup) => true,
            (SessionSetup, Ready) => true,
            // Recording control moves between ready, idle, listening.
            (Ready, Idle) | (Idle, Ready) => true,
            (Ready, Listening) | (Idle, Listening) | (Listening, Idle) => true,
            // Nominal turn cycle.
            (Listening, Processing) => true,
            (Processing, Transcribing) => true,
            (Transcribing, OrderProcessing) => true,
            // A turn with no order intent skips order_processing.
            (Transcribing, ResponseGeneration) => true,
            (OrderProcessing, ResponseGeneration) | (OrderProcessing, Clarification) => true,
            (ResponseGeneration, AudioPlayback) | (Clarification, AudioPlayback) => true,
            (AudioPlayback, Ready) => true,
            // Barge-in.
            (AudioPlayback, Interrupted) => true,
            (Interrupted, Listening) => true,
            // Recovery.
            (Error, Recovering) => true,
            (Recovering, Ready) => true,
            (Disconnected, Connecting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
