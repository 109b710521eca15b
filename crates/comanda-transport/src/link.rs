//! The media+data link seam.
//!
//! A [`MediaLink`] carries one ordered, reliable message channel and
//! one outbound audio track. Link-side happenings are delivered as
//! [`LinkEvent`]s over an owned channel, never through registered
//! callbacks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The network path to the peer is established.
    PathConnected,
    /// The data channel is open; queued messages may be flushed.
    ChannelOpen,
    /// An inbound protocol frame.
    Message(String),
    /// The link dropped unexpectedly.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// The link was closed locally.
    Closed,
}

/// Receiving half of a link's event stream.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// One peer media+data connection.
#[async_trait]
pub trait MediaLink: Send + Sync {
    /// Builds the local connection offer.
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Applies the remote answer, completing negotiation setup.
    async fn apply_answer(&self, answer: &str) -> Result<(), TransportError>;

    /// Sends one protocol frame over the data channel.
    async fn send_text(&self, payload: String) -> Result<(), TransportError>;

    /// Writes one PCM16 audio frame to the outbound media track.
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), TransportError>;

    /// Tears the link down. Idempotent.
    async fn close(&self);
}

/// Creates a fresh link per connection attempt.
///
/// Reconnection always negotiates a brand-new link; links are never
/// reused across attempts.
#[async_trait]
pub trait LinkProvider: Send + Sync {
    /// Creates a link and the receiver for its events.
    async fn create(&self) -> Result<(Arc<dyn MediaLink>, LinkEvents), TransportError>;
}

struct LoopbackShared {
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    open: AtomicBool,
    closed: AtomicBool,
    sent_text: Mutex<Vec<String>>,
    audio_frames: AtomicUsize,
    answer: Mutex<Option<String>>,
}

/// In-process link used by tests and local development.
///
/// The remote half injects frames and drives channel lifecycle; the
/// link half records what the client sent.
pub struct LoopbackLink {
    shared: Arc<LoopbackShared>,
}

/// Control handle for the "server" side of a [`LoopbackLink`].
#[derive(Clone)]
pub struct LoopbackRemote {
    shared: Arc<LoopbackShared>,
}

impl LoopbackLink {
    /// Creates a link, its event stream, and the remote control
    /// handle.
    pub fn pair() -> (Arc<Self>, LinkEvents, LoopbackRemote) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LoopbackShared {
            event_tx,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent_text: Mutex::new(Vec::new()),
            audio_frames: AtomicUsize::new(0),
            answer: Mutex::new(None),
        });
        (
            Arc::new(Self {
                shared: Arc::clone(&shared),
            }),
            event_rx,
            LoopbackRemote { shared },
        )
    }
}

#[async_trait]
impl MediaLink for LoopbackLink {
    async fn create_offer(&self) -> Result<String, TransportError> {
        Ok("v=0\r\ns=loopback-offer\r\n".to_string())
    }

    async fn apply_answer(&self, answer: &str) -> Result<(), TransportError> {
        *self.shared.answer.lock().unwrap() = Some(answer.to_string());
        Ok(())
    }

    async fn send_text(&self, payload: String) -> Result<(), TransportError> {
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.shared.sent_text.lock().unwrap().push(payload);
        Ok(())
    }

    async fn send_audio(&self, _pcm: &[u8]) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.shared.audio_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.open.store(false, Ordering::SeqCst);
            let _ = self.shared.event_tx.send(LinkEvent::Closed);
        }
    }
}

impl LoopbackRemote {
    /// Establishes the path and opens the data channel.
    pub fn open(&self) {
        let _ = self.shared.event_tx.send(LinkEvent::PathConnected);
        self.shared.open.store(true, Ordering::SeqCst);
        let _ = self.shared.event_tx.send(LinkEvent::ChannelOpen);
    }

    /// Injects a raw inbound frame.
    pub fn push_frame(&self, raw: impl Into<String>) {
        let _ = self.shared.event_tx.send(LinkEvent::Message(raw.into()));
    }

    /// Simulates an unexpected connection loss.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self.shared.event_tx.send(LinkEvent::Disconnected {
            reason: reason.into(),
        });
    }

    /// Frames the client sent over the data channel, in order.
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent_text.lock().unwrap().clone()
    }

    /// Number of audio frames written to the track.
    pub fn audio_frames(&self) -> usize {
        self.shared.audio_frames.load(Ordering::SeqCst)
    }

    /// The answer the client applied, if negotiation got that far.
    pub fn applied_answer(&self) -> Option<String> {
        self.shared.answer.lock().unwrap().clone()
    }
}

/// [`LinkProvider`] producing loopback links, keeping every remote
/// handle for inspection.
pub struct LoopbackProvider {
    auto_open: bool,
    remotes: Mutex<Vec<LoopbackRemote>>,
    created: AtomicUsize,
}

impl LoopbackProvider {
    /// Creates a provider. With `auto_open` the channel is opened
    /// immediately on creation, so negotiation completes without an
    /// external driver.
    pub fn new(auto_open: bool) -> Self {
        Self {
            auto_open,
            remotes: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// How many links have been created (negotiations started).
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The remote handle for the `index`-th created link.
    pub fn remote(&self, index: usize) -> Option<LoopbackRemote> {
        self.remotes.lock().unwrap().get(index).cloned()
    }
}

#[async_trait]
impl LinkProvider for LoopbackProvider {
    async fn create(&self) -> Result<(Arc<dyn MediaLink>, LinkEvents), TransportError> {
        let (link, events, remote) = LoopbackLink::pair();
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.auto_open {
            remote.open();
        }
        self.remotes.lock().unwrap().push(remote);
        Ok((link as Arc<dyn MediaLink>, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_open_is_refused_at_link_level() {
        let (link, _events, remote) = LoopbackLink::pair();
        assert!(matches!(
            link.send_text("x".into()).await,
            Err(TransportError::ChannelClosed)
        ));

        remote.open();
        link.send_text("x".into()).await.unwrap();
        assert_eq!(remote.sent(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_emits_one_event() {
        let (link, mut events, remote) = LoopbackLink::pair();
        remote.open();
        // Drain the open events.
        assert_eq!(events.recv().await, Some(LinkEvent::PathConnected));
        assert_eq!(events.recv().await, Some(LinkEvent::ChannelOpen));

        link.close().await;
        link.close().await;
        assert_eq!(events.recv().await, Some(LinkEvent::Closed));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn provider_counts_created_links() {
        let provider = LoopbackProvider::new(true);
        let _ = provider.create().await.unwrap();
        let _ = provider.create().await.unwrap();
        assert_eq!(provider.created(), 2);
        assert!(provider.remote(1).is_some());
        assert!(provider.remote(2).is_none());
    }
}
