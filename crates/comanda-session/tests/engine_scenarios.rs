//! End-to-end engine scenarios over the loopback link.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;

use comanda_audio::{AudioConfig, AudioPipeline, SilenceSource};
use comanda_order::{OrderClient, OrderError};
use comanda_session::{EngineConfig, EngineDeps, SessionEngine, SessionEvent, SessionHandle};
use comanda_transport::{
    CredentialError, CredentialProvider, LinkProvider, LoopbackProvider, LoopbackRemote,
    ReconnectPolicy, StaticCredentialProvider, StaticSignaling,
};
use comanda_types::{
    CartSummary, ConfirmationAction, ConnectionState, OrderItem, OrderReceipt, Session,
    SessionMode,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingOrders {
    submissions: Mutex<Vec<Vec<OrderItem>>>,
    clears: AtomicUsize,
}

#[async_trait]
impl OrderClient for RecordingOrders {
    async fn submit_order(&self, items: &[OrderItem]) -> Result<OrderReceipt, OrderError> {
        self.submissions.lock().unwrap().push(items.to_vec());
        Ok(OrderReceipt {
            success: true,
            order_id: Some("ord-1".to_string()),
        })
    }

    async fn clear_cart(&self) -> Result<(), OrderError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cart_summary(&self) -> Result<CartSummary, OrderError> {
        Ok(CartSummary {
            item_count: 0,
            total: 0.0,
        })
    }
}

struct FailingCredentials;

#[async_trait]
impl CredentialProvider for FailingCredentials {
    async fn fetch(
        &self,
        _restaurant_id: &str,
        _mode: SessionMode,
    ) -> Result<comanda_transport::SessionCredential, CredentialError> {
        Err(CredentialError::Status(500))
    }
}

struct Harness {
    handle: SessionHandle,
    events: broadcast::Receiver<SessionEvent>,
    provider: Arc<LoopbackProvider>,
    orders: Arc<RecordingOrders>,
}

fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    // Keep timers test-friendly: no commit-to-response delay, a wide
    // debounce window, and near-immediate reconnects.
    config.audio.response_delay_ms = 0;
    config.audio.stop_debounce_ms = 10_000;
    config.reconnect = ReconnectPolicy {
        base_ms: 1,
        max_delay_ms: 10,
        jitter_ms: 0,
        max_attempts: 3,
    };
    config
}

fn spawn(credentials: Arc<dyn CredentialProvider>, config: EngineConfig) -> Harness {
    let provider = Arc::new(LoopbackProvider::new(true));
    let orders = Arc::new(RecordingOrders::default());
    let deps = EngineDeps {
        credentials,
        signaling: Arc::new(StaticSignaling::default()),
        links: Arc::clone(&provider) as Arc<dyn LinkProvider>,
        orders: Arc::clone(&orders) as Arc<dyn OrderClient>,
    };
    let pipeline = AudioPipeline::new(
        Box::new(SilenceSource::new(24_000, 20)),
        config.audio.clone(),
    );
    let session = Session::new("r-77", SessionMode::Employee);
    let handle = SessionEngine::spawn(session, deps, pipeline, config);
    let events = handle.subscribe();
    Harness {
        handle,
        events,
        provider,
        orders,
    }
}

fn default_harness() -> Harness {
    spawn(
        Arc::new(StaticCredentialProvider::valid_for("secret", 60_000)),
        engine_config(),
    )
}

async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if pred(&event) {
                        return event;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

fn updated_frame() -> String {
    json!({"type": "session.updated", "session": {"id": "srv-1"}}).to_string()
}

/// Connects and walks the session through configuration ack.
async fn connect_ready(harness: &mut Harness) -> LoopbackRemote {
    harness.handle.connect().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Connected)
    })
    .await;

    let remote = harness
        .provider
        .remote(harness.provider.created() - 1)
        .unwrap();
    remote.push_frame(json!({"type": "session.created", "session": {"id": "srv-1"}}).to_string());
    remote.push_frame(updated_frame());
    wait_for(&mut harness.events, |e| matches!(e, SessionEvent::Ready)).await;
    remote
}

fn count_sent(remote: &LoopbackRemote, frame_type: &str) -> usize {
    let needle = format!("\"type\":\"{frame_type}\"");
    remote
        .sent()
        .iter()
        .filter(|frame| frame.contains(&needle))
        .count()
}

#[tokio::test]
async fn connect_reaches_ready_and_sends_configuration() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;

    let sent = remote.sent();
    assert!(!sent.is_empty());
    assert!(
        sent[0].contains("\"type\":\"session.update\""),
        "first outbound frame should be the session configuration, got {}",
        sent[0]
    );
    // Employee-mode defaults, clamped to legal ranges.
    assert!(sent[0].contains("\"temperature\":0.7"));
    assert!(sent[0].contains("\"max_response_tokens\":1024"));
}

#[tokio::test]
async fn repeated_connect_keeps_a_single_negotiation() {
    let mut harness = default_harness();
    connect_ready(&mut harness).await;

    // Further connects while connected are rejected outright.
    harness.handle.connect().await.unwrap();
    harness.handle.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.provider.created(), 1);
}

#[tokio::test]
async fn credential_failure_surfaces_without_negotiation() {
    let mut harness = spawn(Arc::new(FailingCredentials), engine_config());
    harness.handle.connect().await.unwrap();

    let event = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::TerminalError { .. })
    })
    .await;
    match event {
        SessionEvent::TerminalError { reason, .. } => {
            assert!(reason.contains("status 500"), "got: {reason}");
        }
        _ => unreachable!(),
    }
    assert_eq!(
        harness.provider.created(),
        0,
        "no negotiation may be attempted without a credential"
    );
}

#[tokio::test]
async fn double_stop_produces_one_commit_and_one_response() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;

    harness.handle.start_recording().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(
            e,
            SessionEvent::StateChanged {
                to: ConnectionState::Listening,
                ..
            }
        )
    })
    .await;

    harness.handle.stop_recording().await.unwrap();
    // The duplicate stop lands well inside the debounce window.
    harness.handle.stop_recording().await.unwrap();

    wait_until(|| count_sent(&remote, "response.create") >= 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count_sent(&remote, "input_audio_buffer.commit"), 1);
    assert_eq!(count_sent(&remote, "response.create"), 1);
}

#[tokio::test]
async fn checkout_submits_exactly_once_with_detected_items() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;

    let add_burger = json!({
        "type": "response.function_call_arguments.done",
        "name": "add_item",
        "arguments": json!({"name": "burger", "quantity": 2, "unit_price": 5.0}).to_string(),
    });
    let add_fries = json!({
        "type": "response.function_call_arguments.done",
        "name": "add_item",
        "arguments": json!({"name": "fries"}).to_string(),
    });
    remote.push_frame(add_burger.to_string());
    remote.push_frame(add_fries.to_string());
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::ItemAdded { item } if item.name == "fries")
    })
    .await;

    let confirm = json!({
        "type": "response.function_call_arguments.done",
        "name": "confirm_order",
        "arguments": json!({"action": "checkout"}).to_string(),
    });
    remote.push_frame(confirm.to_string());

    let event = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::OrderSubmitted { .. })
    })
    .await;
    match event {
        SessionEvent::OrderSubmitted { order_id } => {
            assert_eq!(order_id.as_deref(), Some("ord-1"));
        }
        _ => unreachable!(),
    }

    let submissions = harness.orders.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1, "exactly one submission");
    assert_eq!(submissions[0].len(), 2);
    assert_eq!(submissions[0][0].name, "burger");
    assert_eq!(submissions[0][0].quantity, 2);
}

#[tokio::test]
async fn network_drop_recovers_to_ready_with_cleared_state() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;

    harness.handle.start_recording().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(
            e,
            SessionEvent::StateChanged {
                to: ConnectionState::Listening,
                ..
            }
        )
    })
    .await;

    // A finalized transcript before the drop.
    remote.push_frame(
        json!({
            "type": "conversation.item.transcription.completed",
            "item_id": "i1",
            "text": "two burgers"
        })
        .to_string(),
    );
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Transcript { is_final: true, .. })
    })
    .await;

    remote.drop_connection("network lost");

    wait_for(&mut harness.events, |e| {
        matches!(
            e,
            SessionEvent::StateChanged {
                to: ConnectionState::Error,
                ..
            }
        )
    })
    .await;
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Recovering { attempt: 1 })
    })
    .await;

    // The controller negotiates a fresh link; ack its configuration.
    wait_until(|| harness.provider.created() == 2).await;
    let recovered = harness.provider.remote(1).unwrap();
    wait_until(|| count_sent(&recovered, "session.update") >= 1).await;
    recovered.push_frame(updated_frame());

    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Reconnected)
    })
    .await;
    wait_for(&mut harness.events, |e| matches!(e, SessionEvent::Ready)).await;

    let metrics = harness.handle.metrics();
    assert_eq!(metrics.reconnect_attempts, 1);
    assert_eq!(metrics.reconnect_successes, 1);

    // Transcript state was cleared across the gap: the same item id
    // finalizes again instead of being treated as a duplicate.
    recovered.push_frame(
        json!({
            "type": "conversation.item.transcription.completed",
            "item_id": "i1",
            "text": "and a shake"
        })
        .to_string(),
    );
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Transcript { is_final: true, text, .. } if text == "and a shake")
    })
    .await;
}

#[tokio::test]
async fn reconnect_exhaustion_is_a_terminal_reportable_failure() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;
    remote.drop_connection("drop 0");

    for attempt in 1..=3u32 {
        wait_for(&mut harness.events, |e| {
            matches!(e, SessionEvent::Recovering { attempt: a } if *a == attempt)
        })
        .await;
        wait_until(|| harness.provider.created() == (attempt as usize) + 1).await;
        let next = harness.provider.remote(attempt as usize).unwrap();
        next.drop_connection(format!("drop {attempt}"));
    }

    let event = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::TerminalError { .. })
    })
    .await;
    match event {
        SessionEvent::TerminalError {
            reason,
            reconnect_hint,
        } => {
            assert!(reason.contains("exhausted"), "got: {reason}");
            assert!(reconnect_hint);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn barge_in_interrupts_playback_and_cancels_the_response() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;

    harness.handle.start_recording().await.unwrap();
    harness.handle.stop_recording().await.unwrap();
    wait_until(|| count_sent(&remote, "response.create") >= 1).await;

    remote.push_frame(json!({"type": "response.created", "response_id": "r1"}).to_string());
    remote.push_frame(json!({"type": "response.audio.delta", "delta": "AAEC"}).to_string());
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::AssistantAudio { .. })
    })
    .await;

    // The user talks over the playback.
    remote.push_frame(
        json!({"type": "input_audio_buffer.speech_started", "item_id": "u2"}).to_string(),
    );
    wait_for(&mut harness.events, |e| matches!(e, SessionEvent::BargeIn)).await;

    wait_until(|| count_sent(&remote, "response.cancel") >= 1).await;
    assert_eq!(count_sent(&remote, "response.cancel"), 1);
}

#[tokio::test]
async fn review_emits_a_summary_without_submitting() {
    let mut harness = default_harness();
    connect_ready(&mut harness).await;

    harness
        .handle
        .confirm_order(ConfirmationAction::Review)
        .await
        .unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::OrderSummary { .. })
    })
    .await;
    assert!(harness.orders.submissions.lock().unwrap().is_empty());
    assert_eq!(harness.orders.clears.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let mut harness = default_harness();
    let remote = connect_ready(&mut harness).await;

    harness.handle.disconnect().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Disconnected)
    })
    .await;
    harness.handle.disconnect().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Disconnected)
    })
    .await;

    // The dropped link must not trigger reconnection afterwards.
    remote.drop_connection("late event");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.provider.created(), 1);
    assert_eq!(harness.handle.metrics().reconnect_attempts, 0);
}
