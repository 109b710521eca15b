//! Wire schema for the data-channel event protocol.
//!
//! Frames are JSON objects discriminated by a dotted `type` tag.
//! Both directions are modeled as exhaustive tagged enums so that an
//! unhandled frame type is a decode error, not a silently ignored
//! message.

use serde::{Deserialize, Serialize};

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person speaking into the microphone.
    User,
    /// The speech model.
    Assistant,
}

/// Generation settings carried in `session.update`.
///
/// Values are expected to be pre-resolved and clamped by the caller;
/// the protocol layer transmits them as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionSettings {
    /// Upper bound on response length, in tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Frequency repetition penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Presence repetition penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

/// Optional overrides for a single `response.create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseOptions {
    /// One-shot instruction override for this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Client → server protocol commands.
///
/// Immutable once constructed; queued FIFO while the data channel is
/// not yet open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration (generation settings).
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// The settings to apply.
        session: SessionSettings,
    },

    /// Drop any buffered input audio on the server.
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Commit the buffered input audio as a completed user turn.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Ask the model to generate a response for the committed turn.
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Per-response overrides.
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<ResponseOptions>,
    },

    /// Cancel the in-flight response, if any.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Serializes this event to its wire form.
    pub fn to_wire(&self) -> String {
        // Serialization of these enums cannot fail: all payloads are
        // plain strings and numbers.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Session descriptor echoed back by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSessionInfo {
    /// Server-assigned session identifier.
    pub id: String,
    /// Server-side session expiry, epoch milliseconds.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Server → client protocol frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The server created its session object.
    #[serde(rename = "session.created")]
    SessionCreated {
        /// The created session.
        session: ServerSessionInfo,
    },

    /// The server acknowledged a `session.update`.
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// The session after the update.
        session: ServerSessionInfo,
    },

    /// Server-side voice activity: speech began.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// The conversation item the speech is attributed to.
        item_id: String,
    },

    /// Server-side voice activity: speech ended.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// The conversation item the speech is attributed to.
        item_id: String,
    },

    /// Incremental user-speech transcription.
    #[serde(rename = "conversation.item.transcription.delta")]
    TranscriptionDelta {
        /// The conversation item being transcribed.
        item_id: String,
        /// Text fragment to append.
        delta: String,
    },

    /// Final user-speech transcription for an item.
    #[serde(rename = "conversation.item.transcription.completed")]
    TranscriptionCompleted {
        /// The conversation item being transcribed.
        item_id: String,
        /// Complete, authoritative transcript text.
        text: String,
    },

    /// The model started generating a response.
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Identifier of the new response.
        response_id: String,
    },

    /// The model finished (or aborted) a response.
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Identifier of the finished response.
        response_id: String,
    },

    /// Incremental response text.
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        /// Text fragment to append.
        delta: String,
    },

    /// Final response text.
    #[serde(rename = "response.text.done")]
    ResponseTextDone {
        /// Complete response text.
        text: String,
    },

    /// Incremental response audio, base64-encoded PCM.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        /// Base64-encoded audio payload.
        delta: String,
    },

    /// Response audio complete.
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,

    /// A tool call completed with its full argument payload.
    ///
    /// Order intents (`confirm_order`, `add_item`) arrive through this
    /// frame.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallDone {
        /// Server-assigned call identifier.
        #[serde(default)]
        call_id: Option<String>,
        /// Tool name.
        name: String,
        /// JSON-encoded arguments.
        arguments: String,
    },

    /// Server-reported error.
    #[serde(rename = "error")]
    Error {
        /// Machine-readable error code.
        code: String,
        /// Human-readable description.
        message: String,
    },
}

/// How a server error should be routed: connection and protocol
/// errors retry internally, business errors become a clarification
/// turn, credential and auth errors are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient protocol/API failure; retry with backoff.
    Retryable,
    /// Business-logic failure; route back into the conversation as a
    /// clarification turn, never terminate the session.
    Business,
    /// Non-retryable; terminates the session.
    Fatal,
}

/// Classifies a server error code into its routing disposition.
pub fn classify_error_code(code: &str) -> ErrorDisposition {
    match code {
        "item_not_recognized" | "order_incomplete" | "invalid_tool_arguments"
        | "unknown_tool" => ErrorDisposition::Business,
        "invalid_credential" | "credential_expired" | "unauthorized" | "forbidden" => {
            ErrorDisposition::Fatal
        }
        _ if code.starts_with("order_") => ErrorDisposition::Business,
        // Rate limiting, malformed frames, transient server failures.
        _ => ErrorDisposition::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_serialize_with_dotted_type_tags() {
        let wire = ClientEvent::InputAudioBufferCommit.to_wire();
        assert_eq!(wire, "{\"type\":\"input_audio_buffer.commit\"}");

        let wire = ClientEvent::ResponseCreate { options: None }.to_wire();
        assert_eq!(wire, "{\"type\":\"response.create\"}");
    }

    #[test]
    fn session_update_carries_only_set_fields() {
        let event = ClientEvent::SessionUpdate {
            session: SessionSettings {
                temperature: Some(0.8),
                ..Default::default()
            },
        };
        let wire = event.to_wire();
        assert!(wire.contains("\"temperature\":0.8"));
        assert!(!wire.contains("max_response_tokens"));
    }

    #[test]
    fn server_events_round_trip() {
        let raw = "{\"type\":\"conversation.item.transcription.delta\",\
                   \"item_id\":\"item_7\",\"delta\":\"two burgers\"}";
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ServerEvent::TranscriptionDelta {
                item_id: "item_7".into(),
                delta: "two burgers".into(),
            }
        );
    }

    #[test]
    fn unknown_frame_type_fails_to_decode() {
        let raw = "{\"type\":\"conversation.item.truncated\",\"item_id\":\"x\"}";
        assert!(serde_json::from_str::<ServerEvent>(raw).is_err());
    }

    #[test]
    fn error_codes_classify_by_taxonomy() {
        assert_eq!(
            classify_error_code("item_not_recognized"),
            ErrorDisposition::Business
        );
        assert_eq!(
            classify_error_code("order_missing_size"),
            ErrorDisposition::Business
        );
        assert_eq!(
            classify_error_code("invalid_credential"),
            ErrorDisposition::Fatal
        );
        assert_eq!(classify_error_code("rate_limited"), ErrorDisposition::Retryable);
        assert_eq!(classify_error_code("whatever_else"), ErrorDisposition::Retryable);
    }
}
