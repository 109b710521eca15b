//! Normalizes inbound protocol frames into semantic events.
//!
//! The handler is the sole owner of [`ActiveResponse`] and
//! [`TranscriptEntry`] state. All mutation happens here, driven by the
//! session task in frame-receipt order, so no locking is needed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use comanda_types::{ConfirmationAction, OrderConfirmation, OrderItem};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::events::{classify_error_code, ErrorDisposition, Role, ServerEvent};
use crate::metrics::ProtocolMetrics;

/// Item id used for assistant text that arrives while no response is
/// being tracked. Should not happen with a well-behaved server; kept
/// so the text is never dropped on the floor.
const UNATTRIBUTED_ITEM: &str = "unattributed";

/// One transcript line, accumulated from partial deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    /// Who said it.
    pub role: Role,
    /// Correlation id for the conversation item.
    pub item_id: String,
    /// Accumulated text.
    pub text: String,
    /// Set exactly once per item id.
    pub is_final: bool,
}

/// The single in-flight model response for a session.
///
/// Set provisionally when `response.create` is issued (before the
/// server acks with an id), so a second create inside the ack
/// round-trip is refused. Cleared unconditionally by `response.done`.
#[derive(Debug, Clone)]
pub struct ActiveResponse {
    /// Server-assigned id; `None` until `response.created` arrives.
    pub response_id: Option<String>,
    /// When the response was started (locally or by the server).
    pub started_at: Instant,
}

/// Tuning knobs for the handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Window within which an identical final transcript under a
    /// different item id is treated as a duplicate of the same
    /// utterance and dropped.
    pub duplicate_window: Duration,
    /// How many recent finals to keep for the duplicate check.
    pub recent_finals_cap: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            duplicate_window: Duration::from_secs(2),
            recent_finals_cap: 32,
        }
    }
}

/// Semantic events emitted toward the session engine and its
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticEvent {
    /// The server created its session object.
    SessionCreated { session_id: String },
    /// The server acknowledged a configuration update.
    SessionUpdated { session_id: String },
    /// Server-side voice activity started.
    SpeechStarted { item_id: String },
    /// Server-side voice activity stopped.
    SpeechStopped { item_id: String },
    /// A transcript line changed (partial) or was finalized.
    Transcript {
        role: Role,
        item_id: String,
        text: String,
        is_final: bool,
    },
    /// A response began.
    ResponseStarted { response_id: String },
    /// Incremental response text.
    ResponseTextDelta { delta: String },
    /// Final response text.
    ResponseTextDone { text: String },
    /// Decoded response audio (PCM bytes).
    ResponseAudio { pcm: Vec<u8> },
    /// Response audio finished.
    ResponseAudioDone,
    /// A response finished; the in-flight slot is free again.
    ResponseCompleted { response_id: String },
    /// The model recognized an order item.
    OrderItemDetected { item: OrderItem },
    /// The model asked to confirm/review/cancel the order.
    OrderConfirmation { confirmation: OrderConfirmation },
    /// The server reported an error, pre-classified for routing.
    ServerError {
        code: String,
        message: String,
        disposition: ErrorDisposition,
    },
}

/// Arguments of the `confirm_order` tool call.
#[derive(Debug, Deserialize)]
struct ConfirmArgs {
    action: String,
}

/// Arguments of the `add_item` tool call.
#[derive(Debug, Deserialize)]
struct ItemArgs {
    name: String,
    #[serde(default = "default_quantity")]
    quantity: u32,
    #[serde(default)]
    unit_price: f64,
    #[serde(default)]
    notes: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

/// Stateful normalizer for inbound protocol frames.
pub struct EventProtocolHandler {
    config: HandlerConfig,
    metrics: Arc<ProtocolMetrics>,
    active_response: Option<ActiveResponse>,
    entries: HashMap<String, TranscriptEntry>,
    finalized: HashSet<String>,
    /// (role, text, when) of recently finalized entries, for the
    /// cross-item-id duplicate check.
    recent_finals: VecDeque<(Role, String, Instant)>,
}

impl EventProtocolHandler {
    /// Creates a handler with default tuning.
    pub fn new(metrics: Arc<ProtocolMetrics>) -> Self {
        Self::with_config(metrics, HandlerConfig::default())
    }

    /// Creates a handler with explicit tuning.
    pub fn with_config(metrics: Arc<ProtocolMetrics>, config: HandlerConfig) -> Self {
        Self {
            config,
            metrics,
            active_response: None,
            entries: HashMap::new(),
            finalized: HashSet::new(),
            recent_finals: VecDeque::new(),
        }
    }

    /// The currently tracked in-flight response, if any.
    pub fn active_response(&self) -> Option<&ActiveResponse> {
        self.active_response.as_ref()
    }

    /// Looks up a transcript entry by item id.
    pub fn transcript(&self, item_id: &str) -> Option<&TranscriptEntry> {
        self.entries.get(item_id)
    }

    /// Claims the in-flight response slot ahead of a `response.create`.
    ///
    /// Returns `false` (and the caller must not send the create) when a
    /// response is already outstanding. The slot is provisional until
    /// `response.created` fills in the id.
    pub fn begin_response(&mut self) -> bool {
        if self.active_response.is_some() {
            debug!("response.create suppressed: a response is already in flight");
            return false;
        }
        self.active_response = Some(ActiveResponse {
            response_id: None,
            started_at: Instant::now(),
        });
        true
    }

    /// Whether a `response.cancel` should be sent.
    ///
    /// A cancel with no outstanding response is a no-op, never an
    /// error; the in-flight slot itself is cleared by `response.done`.
    pub fn cancel_response(&mut self) -> bool {
        if self.active_response.is_none() {
            debug!("response.cancel suppressed: no response in flight");
            return false;
        }
        true
    }

    /// Wipes all per-turn state. Called on disconnect and before a
    /// reconnected session is configured, since server-side state does
    /// not survive the gap.
    pub fn clear(&mut self) {
        self.active_response = None;
        self.entries.clear();
        self.finalized.clear();
        self.recent_finals.clear();
    }

    /// Decodes one raw frame and applies it, returning the semantic
    /// events it produced.
    pub fn handle_frame(&mut self, raw: &str) -> Result<Vec<SemanticEvent>, ProtocolError> {
        let frame: ServerEvent = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(err) => {
                ProtocolMetrics::incr(&self.metrics.decode_failures);
                warn!(error = %err, "dropping undecodable protocol frame");
                return Err(err.into());
            }
        };
        ProtocolMetrics::incr(&self.metrics.frames_decoded);
        self.apply(frame)
    }

    /// Applies an already-decoded frame.
    pub fn apply(&mut self, frame: ServerEvent) -> Result<Vec<SemanticEvent>, ProtocolError> {
        let events = match frame {
            ServerEvent::SessionCreated { session } => {
                vec![SemanticEvent::SessionCreated {
                    session_id: session.id,
                }]
            }
            ServerEvent::SessionUpdated { session } => {
                vec![SemanticEvent::SessionUpdated {
                    session_id: session.id,
                }]
            }
            ServerEvent::SpeechStarted { item_id } => {
                vec![SemanticEvent::SpeechStarted { item_id }]
            }
            ServerEvent::SpeechStopped { item_id } => {
                vec![SemanticEvent::SpeechStopped { item_id }]
            }
            ServerEvent::TranscriptionDelta { item_id, delta } => {
                self.append_delta(Role::User, item_id, &delta)
            }
            ServerEvent::TranscriptionCompleted { item_id, text } => {
                self.finalize_entry(Role::User, item_id, text)
            }
            ServerEvent::ResponseCreated { response_id } => {
                ProtocolMetrics::incr(&self.metrics.responses_started);
                match self.active_response.as_mut() {
                    Some(active) => active.response_id = Some(response_id.clone()),
                    // Server-initiated response (e.g. server-side VAD
                    // decided the turn ended); track it the same way.
                    None => {
                        self.active_response = Some(ActiveResponse {
                            response_id: Some(response_id.clone()),
                            started_at: Instant::now(),
                        });
                    }
                }
                vec![SemanticEvent::ResponseStarted { response_id }]
            }
            ServerEvent::ResponseDone { response_id } => {
                ProtocolMetrics::incr(&self.metrics.responses_completed);
                self.active_response = None;
                vec![SemanticEvent::ResponseCompleted { response_id }]
            }
            ServerEvent::ResponseTextDelta { delta } => {
                let item_id = self.assistant_item_id();
                let mut events = vec![SemanticEvent::ResponseTextDelta {
                    delta: delta.clone(),
                }];
                events.extend(self.append_delta(Role::Assistant, item_id, &delta));
                events
            }
            ServerEvent::ResponseTextDone { text } => {
                let item_id = self.assistant_item_id();
                let mut events = vec![SemanticEvent::ResponseTextDone { text: text.clone() }];
                events.extend(self.finalize_entry(Role::Assistant, item_id, text));
                events
            }
            ServerEvent::ResponseAudioDelta { delta } => {
                let pcm = BASE64.decode(delta.as_bytes())?;
                vec![SemanticEvent::ResponseAudio { pcm }]
            }
            ServerEvent::ResponseAudioDone => vec![SemanticEvent::ResponseAudioDone],
            ServerEvent::FunctionCallDone {
                call_id,
                name,
                arguments,
            } => self.apply_tool_call(call_id.as_deref(), &name, &arguments),
            ServerEvent::Error { code, message } => {
                let disposition = classify_error_code(&code);
                warn!(code = %code, message = %message, ?disposition, "server error frame");
                vec![SemanticEvent::ServerError {
                    code,
                    message,
                    disposition,
                }]
            }
        };
        Ok(events)
    }

    /// The item id assistant text accumulates under: the active
    /// response id when one is known.
    fn assistant_item_id(&self) -> String {
        self.active_response
            .as_ref()
            .and_then(|active| active.response_id.clone())
            .unwrap_or_else(|| UNATTRIBUTED_ITEM.to_string())
    }

    fn append_delta(&mut self, role: Role, item_id: String, delta: &str) -> Vec<SemanticEvent> {
        if self.finalized.contains(&item_id) {
            warn!(item_id = %item_id, "dropping transcript delta for finalized item");
            return Vec::new();
        }
        let entry = self
            .entries
            .entry(item_id.clone())
            .or_insert_with(|| TranscriptEntry {
                role,
                item_id: item_id.clone(),
                text: String::new(),
                is_final: false,
            });
        entry.text.push_str(delta);
        vec![SemanticEvent::Transcript {
            role,
            item_id,
            text: entry.text.clone(),
            is_final: false,
        }]
    }

    /// Finalizes an entry at most once per item id, with a secondary
    /// content/timing duplicate check across item ids.
    fn finalize_entry(&mut self, role: Role, item_id: String, text: String) -> Vec<SemanticEvent> {
        if self.finalized.contains(&item_id) {
            ProtocolMetrics::incr(&self.metrics.duplicate_finals_dropped);
            warn!(item_id = %item_id, "dropping repeated finalization for item");
            return Vec::new();
        }

        let now = Instant::now();
        self.prune_recent_finals(now);
        let is_cross_item_duplicate = self
            .recent_finals
            .iter()
            .any(|(r, t, _)| *r == role && t.as_str() == text.trim());
        // Mark the id finalized either way so trailing deltas for it
        // are dropped too.
        self.finalized.insert(item_id.clone());

        if is_cross_item_duplicate {
            ProtocolMetrics::incr(&self.metrics.cross_item_duplicates_dropped);
            warn!(
                item_id = %item_id,
                "dropping final transcript duplicated under a new item id"
            );
            return Vec::new();
        }

        self.recent_finals
            .push_back((role, text.trim().to_string(), now));
        while self.recent_finals.len() > self.config.recent_finals_cap {
            self.recent_finals.pop_front();
        }

        let entry = self
            .entries
            .entry(item_id.clone())
            .or_insert_with(|| TranscriptEntry {
                role,
                item_id: item_id.clone(),
                text: String::new(),
                is_final: false,
            });
        // The completed text is authoritative over accumulated deltas.
        entry.text = text;
        entry.is_final = true;

        vec![SemanticEvent::Transcript {
            role,
            item_id,
            text: entry.text.clone(),
            is_final: true,
        }]
    }

    fn prune_recent_finals(&mut self, now: Instant) {
        let window = self.config.duplicate_window;
        while let Some((_, _, at)) = self.recent_finals.front() {
            if now.duration_since(*at) > window {
                self.recent_finals.pop_front();
            } else {
                break;
            }
        }
    }

    fn apply_tool_call(
        &mut self,
        call_id: Option<&str>,
        name: &str,
        arguments: &str,
    ) -> Vec<SemanticEvent> {
        match name {
            "confirm_order" => match serde_json::from_str::<ConfirmArgs>(arguments) {
                Ok(args) => match ConfirmationAction::parse(&args.action) {
                    Some(action) => vec![SemanticEvent::OrderConfirmation {
                        confirmation: OrderConfirmation::now(action),
                    }],
                    None => self.tool_error(call_id, name, "unknown confirmation action"),
                },
                Err(err) => self.tool_error(call_id, name, &err.to_string()),
            },
            "add_item" => match serde_json::from_str::<ItemArgs>(arguments) {
                Ok(args) => vec![SemanticEvent::OrderItemDetected {
                    item: OrderItem {
                        name: args.name,
                        quantity: args.quantity.max(1),
                        unit_price: args.unit_price,
                        notes: args.notes,
                    },
                }],
                Err(err) => self.tool_error(call_id, name, &err.to_string()),
            },
            other => {
                warn!(tool = %other, "server invoked a tool this client does not know");
                vec![SemanticEvent::ServerError {
                    code: "unknown_tool".to_string(),
                    message: format!("unhandled tool call: {other}"),
                    disposition: ErrorDisposition::Business,
                }]
            }
        }
    }

    fn tool_error(&self, call_id: Option<&str>, name: &str, detail: &str) -> Vec<SemanticEvent> {
        warn!(
            tool = %name,
            call_id = call_id.unwrap_or("-"),
            detail = %detail,
            "malformed tool call arguments"
        );
        vec![SemanticEvent::ServerError {
            code: "invalid_tool_arguments".to_string(),
            message: format!("{name}: {detail}"),
            disposition: ErrorDisposition::Business,
        }]
    }
}
