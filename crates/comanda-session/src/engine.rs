//! The per-session engine: one spawned task, one event loop.
//!
//! All protocol handling, entity mutation, timers, and media events
//! run cooperatively inside this task, so nothing here needs a lock.
//! Consumers talk to the engine through [`SessionHandle`] commands and
//! subscribe to [`SessionEvent`]s — typed channels, not callbacks, so
//! consumer churn can never tear the connection down.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use comanda_audio::{f32_to_pcm16, AudioFrame, AudioPipeline};
use comanda_order::{BridgeOutcome, OrderBridge, OrderClient};
use comanda_protocol::{
    ClientEvent, ErrorDisposition, EventProtocolHandler, MetricsSnapshot, ProtocolMetrics, Role,
    SemanticEvent,
};
use comanda_transport::{
    AnswerExchange, CredentialProvider, LinkEvent, LinkProvider, ReconnectionController,
    SessionCredential, TransportConnection, TransportError,
};
use comanda_types::{CartSummary, ConfirmationAction, ConnectionState, OrderItem, Session};

use crate::config::{resolve_generation, EngineConfig};
use crate::error::EngineError;

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 32;
/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Commands a consumer can issue against a session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Establish the connection.
    Connect,
    /// Open the recording gate.
    StartRecording,
    /// Close the gate and commit the turn.
    StopRecording,
    /// Apply an order confirmation (same path the protocol intent
    /// takes).
    ConfirmOrder(ConfirmationAction),
    /// Tear the session down. Idempotent.
    Disconnect,
}

/// Events emitted toward subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection state machine moved.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Network path and data channel are established.
    Connected,
    /// Session configuration acknowledged; a turn can start.
    Ready,
    /// A reconnection re-established the session.
    Reconnected,
    /// A reconnect attempt is scheduled.
    Recovering { attempt: u32 },
    /// The session was torn down.
    Disconnected,
    /// A transcript line changed or finalized.
    Transcript {
        role: Role,
        item_id: String,
        text: String,
        is_final: bool,
    },
    /// Local voice-activity feedback for the UI.
    VoiceActivity { active: bool },
    /// The user interrupted response playback.
    BargeIn,
    /// Decoded response audio for playback.
    AssistantAudio { pcm: Vec<u8> },
    /// The model added an item to the order.
    ItemAdded { item: OrderItem },
    /// The order system accepted the order.
    OrderSubmitted { order_id: Option<String> },
    /// Cart summary for a review request.
    OrderSummary { summary: CartSummary },
    /// The cart was cleared.
    CartCleared,
    /// An order action failed; retry is the caller's decision.
    OrderActionFailed { reason: String },
    /// The conversation needs another turn to resolve the order.
    Clarification { code: String, message: String },
    /// A retryable protocol error that did not interrupt the session.
    ProtocolError { code: String, message: String },
    /// Microphone capture is unavailable.
    AudioUnavailable { reason: String, retryable: bool },
    /// The session failed terminally; present an explicit
    /// reconnect-style action instead of an ambiguous state.
    TerminalError { reason: String, reconnect_hint: bool },
}

/// External collaborators the engine drives.
pub struct EngineDeps {
    /// Token endpoint client.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Offer/answer exchange.
    pub signaling: Arc<dyn AnswerExchange>,
    /// Produces a fresh peer link per connection attempt.
    pub links: Arc<dyn LinkProvider>,
    /// The external cart/order system.
    pub orders: Arc<dyn OrderClient>,
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    metrics: Arc<ProtocolMetrics>,
}

impl SessionHandle {
    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Point-in-time protocol-health counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Requests connection establishment.
    pub async fn connect(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::Connect).await
    }

    /// Opens the recording gate.
    pub async fn start_recording(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::StartRecording).await
    }

    /// Closes the recording gate and commits the turn.
    pub async fn stop_recording(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::StopRecording).await
    }

    /// Applies an order confirmation.
    pub async fn confirm_order(&self, action: ConfirmationAction) -> Result<(), EngineError> {
        self.send(SessionCommand::ConfirmOrder(action)).await
    }

    /// Tears the session down.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::Disconnect).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), EngineError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }
}

enum Tick {
    Command(Option<SessionCommand>),
    Link(Option<LinkEvent>),
    Audio(Option<AudioFrame>),
    ResponseDue,
    ReconnectDue,
}

/// The engine state owned by the session task.
pub struct SessionEngine {
    session: Session,
    config: EngineConfig,
    deps: EngineDeps,
    state: ConnectionState,
    handler: EventProtocolHandler,
    metrics: Arc<ProtocolMetrics>,
    pipeline: AudioPipeline,
    connection: Option<TransportConnection>,
    reconnect: ReconnectionController,
    bridge: OrderBridge<Arc<dyn OrderClient>>,
    cart: Vec<OrderItem>,
    events_tx: broadcast::Sender<SessionEvent>,
    response_due: Option<Instant>,
    reconnect_due: Option<Instant>,
    last_voice: Option<bool>,
    user_disconnect: bool,
}

impl SessionEngine {
    /// Spawns the session task and returns its handle.
    pub fn spawn(
        session: Session,
        deps: EngineDeps,
        pipeline: AudioPipeline,
        config: EngineConfig,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let metrics = Arc::new(ProtocolMetrics::default());

        let handle = SessionHandle {
            cmd_tx,
            events_tx: events_tx.clone(),
            metrics: Arc::clone(&metrics),
        };

        let reconnect = ReconnectionController::new(config.reconnect.clone());
        let bridge = OrderBridge::new(Arc::clone(&deps.orders));
        let handler = EventProtocolHandler::new(Arc::clone(&metrics));

        let engine = Self {
            session,
            config,
            deps,
            state: ConnectionState::Disconnected,
            handler,
            metrics,
            pipeline,
            connection: None,
            reconnect,
            bridge,
            cart: Vec::new(),
            events_tx,
            response_due: None,
            reconnect_due: None,
            last_voice: None,
            user_disconnect: false,
        };
        tokio::spawn(engine.run(cmd_rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(
            session_id = %self.session.id,
            restaurant = %self.session.restaurant_id,
            mode = %self.session.mode,
            "session task started"
        );
        loop {
            let tick = tokio::select! {
                command = commands.recv() => Tick::Command(command),
                event = Self::link_tick(&mut self.connection) => Tick::Link(event),
                frame = Self::audio_tick(&mut self.pipeline) => Tick::Audio(frame),
                _ = Self::deadline_tick(self.response_due) => Tick::ResponseDue,
                _ = Self::deadline_tick(self.reconnect_due) => Tick::ReconnectDue,
            };

            match tick {
                Tick::Command(None) => {
                    // Every handle is gone; the session dies with them.
                    self.teardown().await;
                    break;
                }
                Tick::Command(Some(command)) => self.handle_command(command).await,
                Tick::Link(None) => {
                    self.on_connection_lost("link event stream ended".to_string())
                        .await
                }
                Tick::Link(Some(event)) => self.handle_link_event(event).await,
                Tick::Audio(None) => {
                    debug!("audio source ended");
                    self.pipeline.release();
                }
                Tick::Audio(Some(frame)) => self.handle_audio(frame).await,
                Tick::ResponseDue => {
                    self.response_due = None;
                    self.fire_response().await;
                }
                Tick::ReconnectDue => {
                    self.reconnect_due = None;
                    self.attempt_reconnect().await;
                }
            }
        }
        info!(session_id = %self.session.id, "session task finished");
    }

    /// Pends forever while no connection exists.
    async fn link_tick(connection: &mut Option<TransportConnection>) -> Option<LinkEvent> {
        match connection.as_mut() {
            Some(conn) => conn.next_event().await,
            None => std::future::pending().await,
        }
    }

    /// Pends forever while no capture source is acquired.
    async fn audio_tick(pipeline: &mut AudioPipeline) -> Option<AudioFrame> {
        if !pipeline.is_acquired() {
            std::future::pending::<()>().await;
        }
        pipeline.next_frame().await
    }

    /// Pends forever while no deadline is set.
    async fn deadline_tick(deadline: Option<Instant>) {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => match self.state {
                ConnectionState::Disconnected => self.do_connect().await,
                ConnectionState::Connecting | ConnectionState::Recovering => {
                    debug!("connect ignored: negotiation already in flight");
                }
                _ => {
                    warn!(state = %self.state, "connect rejected: session already connected");
                }
            },
            SessionCommand::StartRecording => self.do_start_recording().await,
            SessionCommand::StopRecording => self.do_stop_recording().await,
            SessionCommand::ConfirmOrder(action) => self.apply_confirmation(action).await,
            SessionCommand::Disconnect => {
                info!("disconnect requested");
                self.user_disconnect = true;
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::Disconnected);
            }
        }
    }

    async fn do_connect(&mut self) {
        self.user_disconnect = false;
        self.set_state(ConnectionState::Connecting);

        let credential = match self
            .deps
            .credentials
            .fetch(&self.session.restaurant_id, self.session.mode)
            .await
        {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "credential fetch failed");
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::TerminalError {
                    reason: err.to_string(),
                    reconnect_hint: true,
                });
                return;
            }
        };
        self.session.credential_expires_at = credential.expires_at;

        match self.establish(&credential).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.emit(SessionEvent::Connected);
                self.set_state(ConnectionState::SessionSetup);
                if let Err(err) = self.send_session_config().await {
                    warn!(error = %err, "session configuration send failed");
                    self.drop_connection().await;
                    self.fail_into_recovery(err.to_string()).await;
                }
            }
            Err(err) => {
                // Initial connect does not auto-retry; the caller gets
                // an explicit failure with a reconnect action.
                warn!(error = %err, "negotiation failed");
                self.connection = None;
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::TerminalError {
                    reason: err.to_string(),
                    reconnect_hint: true,
                });
            }
        }
    }

    /// Negotiates a fresh link and waits for readiness. The capture
    /// source is acquired on first establishment and survives
    /// reconnects untouched.
    async fn establish(&mut self, credential: &SessionCredential) -> Result<(), TransportError> {
        let mut connection = TransportConnection::negotiate(
            self.deps.links.as_ref(),
            self.deps.signaling.as_ref(),
            credential,
            Arc::clone(&self.metrics),
        )
        .await?;
        connection
            .await_ready(self.config.negotiation_timeout())
            .await?;
        self.connection = Some(connection);

        if !self.pipeline.is_acquired() {
            if let Err(err) = self.pipeline.acquire() {
                warn!(error = %err, "audio capture unavailable");
                self.emit(SessionEvent::AudioUnavailable {
                    reason: err.to_string(),
                    retryable: err.retryable(),
                });
            }
        }
        Ok(())
    }

    async fn send_session_config(&mut self) -> Result<(), TransportError> {
        let settings = resolve_generation(
            &self.config.generation,
            self.config.restaurant.as_ref(),
            self.session.mode,
        );
        self.send_event(ClientEvent::SessionUpdate { session: settings })
            .await
    }

    async fn send_event(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        match self.connection.as_mut() {
            Some(connection) => connection.send(event).await,
            None => Err(TransportError::ChannelClosed),
        }
    }

    async fn do_start_recording(&mut self) {
        match self.state {
            // `listening` is included for the barge-in case: the
            // state already moved but the gate is still closed.
            ConnectionState::Ready | ConnectionState::Idle | ConnectionState::Listening => {}
            // Pressing talk over playback is a barge-in under
            // push-to-talk control.
            ConnectionState::AudioPlayback => {
                self.barge_in().await;
            }
            _ => {
                warn!(state = %self.state, "start_recording ignored in this state");
                return;
            }
        }
        if self.pipeline.start_recording() {
            if let Err(err) = self.send_event(ClientEvent::InputAudioBufferClear).await {
                warn!(error = %err, "buffer clear send failed");
            }
            self.set_state(ConnectionState::Listening);
        } else {
            debug!("start_recording ignored: already recording");
        }
    }

    /// Interrupts response playback: cancel the in-flight response
    /// (guarded) and return to listening.
    async fn barge_in(&mut self) {
        self.set_state(ConnectionState::Interrupted);
        if self.handler.cancel_response() {
            if let Err(err) = self.send_event(ClientEvent::ResponseCancel).await {
                warn!(error = %err, "response.cancel send failed");
            }
        }
        self.set_state(ConnectionState::Listening);
        self.emit(SessionEvent::BargeIn);
    }

    async fn do_stop_recording(&mut self) {
        let Some(sequence) = self.pipeline.stop_recording() else {
            debug!("stop_recording ignored (not recording or debounced)");
            return;
        };
        if let Err(err) = self.send_event(ClientEvent::InputAudioBufferCommit).await {
            warn!(error = %err, "buffer commit send failed");
        }
        self.set_state(ConnectionState::Processing);
        self.response_due = Some(Instant::now() + sequence.response_delay);
    }

    /// Issues the deferred `response.create`, but only through the
    /// in-flight response guard.
    async fn fire_response(&mut self) {
        if !self.handler.begin_response() {
            debug!("deferred response.create suppressed by in-flight guard");
            return;
        }
        if let Err(err) = self
            .send_event(ClientEvent::ResponseCreate { options: None })
            .await
        {
            warn!(error = %err, "response.create send failed");
        }
    }

    async fn handle_audio(&mut self, frame: AudioFrame) {
        if self.last_voice != Some(frame.voice_active) {
            self.last_voice = Some(frame.voice_active);
            self.emit(SessionEvent::VoiceActivity {
                active: frame.voice_active,
            });
        }
        if frame.transmit {
            if let Some(connection) = self.connection.as_ref() {
                let pcm = f32_to_pcm16(&frame.samples);
                if let Err(err) = connection.send_audio(&pcm).await {
                    debug!(error = %err, "audio frame dropped");
                }
            }
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Message(raw) => match self.handler.handle_frame(&raw) {
                Ok(events) => {
                    for semantic in events {
                        self.handle_semantic(semantic).await;
                    }
                }
                Err(err) => warn!(error = %err, "protocol frame rejected"),
            },
            LinkEvent::Disconnected { reason } => {
                if !self.user_disconnect {
                    self.on_connection_lost(reason).await;
                }
            }
            LinkEvent::Closed => {
                if !self.user_disconnect {
                    self.on_connection_lost("link closed".to_string()).await;
                }
            }
            LinkEvent::PathConnected | LinkEvent::ChannelOpen => {}
        }
    }

    async fn handle_semantic(&mut self, event: SemanticEvent) {
        match event {
            SemanticEvent::SessionCreated { session_id } => {
                debug!(session_id = %session_id, "server session created");
            }
            SemanticEvent::SessionUpdated { .. } => match self.state {
                ConnectionState::SessionSetup => {
                    self.set_state(ConnectionState::Ready);
                    self.emit(SessionEvent::Ready);
                }
                ConnectionState::Recovering => {
                    // Configuration ack completes the reconnection.
                    self.reconnect.reset();
                    ProtocolMetrics::incr(&self.metrics.reconnect_successes);
                    self.set_state(ConnectionState::Ready);
                    self.emit(SessionEvent::Reconnected);
                    self.emit(SessionEvent::Ready);
                }
                _ => debug!("session.updated outside setup"),
            },
            SemanticEvent::SpeechStarted { item_id } => {
                debug!(item_id = %item_id, "speech started");
                if self.state == ConnectionState::AudioPlayback {
                    self.barge_in().await;
                }
            }
            SemanticEvent::SpeechStopped { item_id } => {
                debug!(item_id = %item_id, "speech stopped");
            }
            SemanticEvent::Transcript {
                role,
                item_id,
                text,
                is_final,
            } => {
                if role == Role::User && self.state == ConnectionState::Processing {
                    self.set_state(ConnectionState::Transcribing);
                }
                self.emit(SessionEvent::Transcript {
                    role,
                    item_id,
                    text,
                    is_final,
                });
            }
            SemanticEvent::ResponseStarted { response_id } => {
                debug!(response_id = %response_id, "response started");
                if self.state == ConnectionState::Processing {
                    self.set_state(ConnectionState::Transcribing);
                }
                if matches!(
                    self.state,
                    ConnectionState::Transcribing | ConnectionState::OrderProcessing
                ) {
                    self.set_state(ConnectionState::ResponseGeneration);
                }
            }
            SemanticEvent::ResponseTextDelta { .. } | SemanticEvent::ResponseTextDone { .. } => {
                // Assistant text reaches subscribers as transcript
                // events.
            }
            SemanticEvent::ResponseAudio { pcm } => {
                if matches!(
                    self.state,
                    ConnectionState::ResponseGeneration | ConnectionState::Clarification
                ) {
                    self.set_state(ConnectionState::AudioPlayback);
                }
                self.emit(SessionEvent::AssistantAudio { pcm });
            }
            SemanticEvent::ResponseAudioDone => {}
            SemanticEvent::ResponseCompleted { response_id } => {
                debug!(response_id = %response_id, "response completed");
                match self.state {
                    ConnectionState::ResponseGeneration | ConnectionState::Clarification => {
                        self.set_state(ConnectionState::AudioPlayback);
                        self.set_state(ConnectionState::Ready);
                    }
                    ConnectionState::AudioPlayback => {
                        self.set_state(ConnectionState::Ready);
                    }
                    _ => {}
                }
            }
            SemanticEvent::OrderItemDetected { item } => {
                if self.state == ConnectionState::Transcribing {
                    self.set_state(ConnectionState::OrderProcessing);
                }
                info!(item = %item.name, quantity = item.quantity, "order item detected");
                self.cart.push(item.clone());
                self.emit(SessionEvent::ItemAdded { item });
            }
            SemanticEvent::OrderConfirmation { confirmation } => {
                if self.state == ConnectionState::Transcribing {
                    self.set_state(ConnectionState::OrderProcessing);
                }
                self.apply_confirmation(confirmation.action).await;
            }
            SemanticEvent::ServerError {
                code,
                message,
                disposition,
            } => self.handle_server_error(code, message, disposition).await,
        }
    }

    async fn handle_server_error(
        &mut self,
        code: String,
        message: String,
        disposition: ErrorDisposition,
    ) {
        match disposition {
            ErrorDisposition::Business => {
                // Never terminates the session; it becomes another
                // conversation turn.
                if self.state == ConnectionState::OrderProcessing {
                    self.set_state(ConnectionState::Clarification);
                }
                self.emit(SessionEvent::Clarification { code, message });
            }
            ErrorDisposition::Retryable => {
                if self.state == ConnectionState::SessionSetup {
                    warn!(code = %code, "session configuration rejected");
                    self.drop_connection().await;
                    self.fail_into_recovery(format!("configuration rejected: {code}"))
                        .await;
                } else {
                    warn!(code = %code, message = %message, "retryable server error");
                    self.emit(SessionEvent::ProtocolError { code, message });
                }
            }
            ErrorDisposition::Fatal => {
                warn!(code = %code, message = %message, "fatal server error");
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::TerminalError {
                    reason: format!("{code}: {message}"),
                    reconnect_hint: false,
                });
            }
        }
    }

    async fn apply_confirmation(&mut self, action: ConfirmationAction) {
        info!(action = %action, items = self.cart.len(), "order confirmation");
        let outcome = self.bridge.on_confirmation(action, &self.cart).await;
        match outcome {
            BridgeOutcome::OrderSubmitted { order_id } => {
                self.cart.clear();
                self.emit(SessionEvent::OrderSubmitted { order_id });
            }
            BridgeOutcome::SubmitFailed { reason } => {
                self.emit(SessionEvent::OrderActionFailed { reason });
            }
            BridgeOutcome::NothingToSubmit => {
                self.emit(SessionEvent::Clarification {
                    code: "order_empty".to_string(),
                    message: "checkout requested with an empty cart".to_string(),
                });
            }
            BridgeOutcome::OrderSummary { summary } => {
                self.emit(SessionEvent::OrderSummary { summary });
            }
            BridgeOutcome::CartCleared => {
                self.cart.clear();
                self.emit(SessionEvent::CartCleared);
            }
        }
    }

    async fn on_connection_lost(&mut self, reason: String) {
        warn!(reason = %reason, "connection lost");
        self.drop_connection().await;
        self.fail_into_recovery(reason).await;
    }

    /// Closes the connection and clears everything tied to it. Queued
    /// messages are discarded, never replayed across the gap.
    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.response_due = None;
        self.handler.clear();
    }

    async fn fail_into_recovery(&mut self, reason: String) {
        self.set_state(ConnectionState::Error);
        match self.reconnect.next_attempt(reason.as_str()) {
            Some(delay) => {
                ProtocolMetrics::incr(&self.metrics.reconnect_attempts);
                self.set_state(ConnectionState::Recovering);
                self.emit(SessionEvent::Recovering {
                    attempt: self.reconnect.attempts(),
                });
                self.reconnect_due = Some(Instant::now() + delay);
            }
            None => {
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::TerminalError {
                    reason: format!("reconnect attempts exhausted: {reason}"),
                    reconnect_hint: true,
                });
            }
        }
    }

    /// Runs one reconnect attempt: fresh credential, fresh link, full
    /// session configuration. The state stays `recovering` until the
    /// configuration ack arrives.
    async fn attempt_reconnect(&mut self) {
        debug!(attempt = self.reconnect.attempts(), "reconnecting");
        let credential = match self
            .deps
            .credentials
            .fetch(&self.session.restaurant_id, self.session.mode)
            .await
        {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "credential fetch failed during recovery");
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::TerminalError {
                    reason: err.to_string(),
                    reconnect_hint: true,
                });
                return;
            }
        };
        self.session.credential_expires_at = credential.expires_at;

        match self.establish(&credential).await {
            Ok(()) => {
                if let Err(err) = self.send_session_config().await {
                    self.drop_connection().await;
                    self.fail_into_recovery(err.to_string()).await;
                }
            }
            Err(err) if err.retryable() => {
                self.fail_into_recovery(err.to_string()).await;
            }
            Err(err) => {
                warn!(error = %err, "non-retryable failure during recovery");
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::TerminalError {
                    reason: err.to_string(),
                    reconnect_hint: true,
                });
            }
        }
    }

    /// Cancels timers, releases the capture source, closes the link,
    /// and clears protocol state. Safe to call from any state, any
    /// number of times.
    async fn teardown(&mut self) {
        self.response_due = None;
        self.reconnect_due = None;
        self.drop_connection().await;
        self.pipeline.release();
        self.reconnect.reset();
        self.last_voice = None;
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "illegal state transition refused");
            return;
        }
        let from = self.state;
        self.state = next;
        debug!(from = %from, to = %next, "state transition");
        self.emit(SessionEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events_tx.send(event);
    }
}
