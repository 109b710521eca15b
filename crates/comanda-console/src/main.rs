//! Comanda console — a push-to-talk terminal harness for one live
//! voice ordering session.
//!
//! Loads configuration, initializes structured logging, spawns a
//! session engine against the configured endpoints, and drives it from
//! stdin commands while printing session events.

mod config;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use comanda_audio::{AudioPipeline, AudioSource, ParecSource, SilenceSource};
use comanda_order::{HttpOrderClient, OrderClient};
use comanda_session::{EngineDeps, Role, SessionEngine, SessionEvent, SessionHandle};
use comanda_transport::{
    AnswerExchange, CredentialProvider, HttpCredentialProvider, HttpSignaling, LinkProvider,
};
use comanda_types::{ConfirmationAction, Session};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("COMANDA_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn capture_source(kind: &str, target_rate: u32, frame_ms: u64) -> Box<dyn AudioSource> {
    match kind {
        "silence" => Box::new(SilenceSource::new(target_rate, frame_ms)),
        _ => Box::new(ParecSource::new(target_rate, frame_ms)),
    }
}

#[cfg(feature = "webrtc")]
fn link_provider() -> Arc<dyn LinkProvider> {
    Arc::new(comanda_transport::WebRtcProvider::new(
        comanda_transport::WebRtcLinkConfig::default(),
    ))
}

#[cfg(not(feature = "webrtc"))]
fn link_provider() -> Arc<dyn LinkProvider> {
    println!("note: built without the webrtc feature; using the loopback transport (dry run)");
    Arc::new(comanda_transport::LoopbackProvider::new(true))
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("comanda.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the console cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let deps = EngineDeps {
        credentials: Arc::new(HttpCredentialProvider::new(
            config.endpoints.credential_url.clone(),
        )) as Arc<dyn CredentialProvider>,
        signaling: Arc::new(HttpSignaling::new(config.endpoints.signaling_url.clone()))
            as Arc<dyn AnswerExchange>,
        links: link_provider(),
        orders: Arc::new(HttpOrderClient::new(config.endpoints.order_url.clone()))
            as Arc<dyn OrderClient>,
    };

    let pipeline = AudioPipeline::new(
        capture_source(
            &config.session.capture,
            config.engine.audio.target_rate,
            config.engine.audio.frame_ms,
        ),
        config.engine.audio.clone(),
    );

    let session = Session::new(config.session.restaurant_id.clone(), config.session.mode);
    tracing::info!(session_id = %session.id, "starting session");

    let handle = SessionEngine::spawn(session, deps, pipeline, config.engine.clone());
    let printer = tokio::spawn(print_events(handle.clone()));

    println!("commands: connect | start | stop | review | checkout | cancel | metrics | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let result = match line.trim() {
            "" => Ok(()),
            "connect" => handle.connect().await,
            "start" => handle.start_recording().await,
            "stop" => handle.stop_recording().await,
            "review" => handle.confirm_order(ConfirmationAction::Review).await,
            "checkout" => handle.confirm_order(ConfirmationAction::Checkout).await,
            "cancel" => handle.confirm_order(ConfirmationAction::Cancel).await,
            "metrics" => {
                println!("{:#?}", handle.metrics());
                Ok(())
            }
            "quit" | "exit" => {
                let _ = handle.disconnect().await;
                break;
            }
            other => {
                println!("unknown command: {other}");
                Ok(())
            }
        };
        if let Err(err) = result {
            println!("session is gone: {err}");
            break;
        }
    }

    printer.abort();
    tracing::info!("console shut down");
}

/// Prints session events until the session task ends.
async fn print_events(handle: SessionHandle) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => print_event(event),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::Ready => println!("* ready — press `start` to talk"),
        SessionEvent::Connected => println!("* connected"),
        SessionEvent::Reconnected => println!("* reconnected"),
        SessionEvent::Recovering { attempt } => println!("* reconnecting (attempt {attempt})"),
        SessionEvent::Disconnected => println!("* disconnected"),
        SessionEvent::VoiceActivity { active } => {
            if active {
                println!("* voice detected");
            }
        }
        SessionEvent::BargeIn => println!("* barge-in"),
        SessionEvent::Transcript {
            role,
            text,
            is_final,
            ..
        } => {
            if is_final {
                let who = match role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("{who}: {text}");
            }
        }
        SessionEvent::ItemAdded { item } => {
            println!("+ {} × {} (${:.2})", item.quantity, item.name, item.unit_price);
        }
        SessionEvent::OrderSubmitted { order_id } => {
            println!("order submitted: {}", order_id.as_deref().unwrap_or("<no id>"));
        }
        SessionEvent::OrderSummary { summary } => {
            println!(
                "cart: {} items, total ${:.2}",
                summary.item_count, summary.total
            );
        }
        SessionEvent::CartCleared => println!("cart cleared"),
        SessionEvent::OrderActionFailed { reason } => println!("order action failed: {reason}"),
        SessionEvent::Clarification { message, .. } => println!("assistant needs more: {message}"),
        SessionEvent::ProtocolError { code, message } => {
            println!("protocol error [{code}]: {message}");
        }
        SessionEvent::AudioUnavailable { reason, .. } => {
            println!("microphone unavailable: {reason}");
        }
        SessionEvent::TerminalError {
            reason,
            reconnect_hint,
        } => {
            if reconnect_hint {
                println!("session failed: {reason} — type `connect` to try again");
            } else {
                println!("session failed: {reason}");
            }
        }
        SessionEvent::StateChanged { .. } | SessionEvent::AssistantAudio { .. } => {}
    }
}
