//! One negotiated transport connection with an ordered outbound
//! queue.
//!
//! Messages sent before the data channel opens are queued and flushed
//! strictly in arrival order by the channel-open event, so the connect
//! race can never reorder or drop them. Queued-but-unsent messages are
//! discarded on disconnect — server-side session state does not
//! survive the gap, so replaying them would be wrong.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use comanda_protocol::{ClientEvent, ProtocolMetrics};

use crate::credential::SessionCredential;
use crate::error::TransportError;
use crate::link::{LinkEvent, LinkEvents, LinkProvider, MediaLink};
use crate::signaling::AnswerExchange;

/// A single peer connection owned by one session.
pub struct TransportConnection {
    link: Arc<dyn MediaLink>,
    events: LinkEvents,
    pending: VecDeque<ClientEvent>,
    /// Inbound frames observed before the caller started consuming
    /// events; served first by `next_event`.
    backlog: VecDeque<LinkEvent>,
    path_connected: bool,
    channel_open: bool,
    metrics: Arc<ProtocolMetrics>,
}

impl TransportConnection {
    /// Runs the negotiation exchange: create a link, build the local
    /// offer, trade it for an answer using the credential as bearer
    /// auth, and apply the answer.
    ///
    /// The returned connection is not yet open; follow with
    /// [`TransportConnection::await_ready`]. The credential is checked
    /// for expiry both before and after the exchange — it expiring
    /// mid-negotiation is fatal for this attempt.
    pub async fn negotiate(
        link_provider: &dyn LinkProvider,
        signaling: &dyn AnswerExchange,
        credential: &SessionCredential,
        metrics: Arc<ProtocolMetrics>,
    ) -> Result<Self, TransportError> {
        if credential.is_expired() {
            return Err(TransportError::CredentialExpired);
        }

        let (link, events) = link_provider.create().await?;
        let offer = link.create_offer().await?;
        let answer = signaling.exchange(&offer, credential).await?;

        if credential.is_expired() {
            link.close().await;
            return Err(TransportError::CredentialExpired);
        }

        link.apply_answer(&answer).await?;
        debug!("answer applied, waiting for path and data channel");

        Ok(Self {
            link,
            events,
            pending: VecDeque::new(),
            backlog: VecDeque::new(),
            path_connected: false,
            channel_open: false,
            metrics,
        })
    }

    /// Whether the data channel is currently open.
    pub fn is_open(&self) -> bool {
        self.channel_open
    }

    /// Messages waiting for the channel to open.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Consumes link events until both the network path and the data
    /// channel report ready, flushing the queue on channel open.
    ///
    /// Fails fast on timeout rather than hanging in `connecting`; the
    /// link is closed on every failure path.
    pub async fn await_ready(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let result = tokio::time::timeout(timeout, self.drive_until_ready()).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.link.close().await;
                Err(err)
            }
            Err(_) => {
                self.link.close().await;
                Err(TransportError::NegotiationTimeout)
            }
        }
    }

    async fn drive_until_ready(&mut self) -> Result<(), TransportError> {
        while !(self.path_connected && self.channel_open) {
            let event = self
                .events
                .recv()
                .await
                .ok_or_else(|| TransportError::Link("link event stream ended".to_string()))?;
            match event {
                LinkEvent::PathConnected => self.path_connected = true,
                LinkEvent::ChannelOpen => {
                    self.channel_open = true;
                    self.flush_pending().await?;
                }
                LinkEvent::Message(raw) => {
                    // A frame beat the caller to the event stream;
                    // keep it for next_event so nothing is lost.
                    self.backlog.push_back(LinkEvent::Message(raw));
                }
                LinkEvent::Disconnected { reason } => {
                    return Err(TransportError::Link(reason));
                }
                LinkEvent::Closed => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
        Ok(())
    }

    /// Sends a protocol command, queueing it FIFO while the channel is
    /// not open.
    pub async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        if self.channel_open {
            self.link.send_text(event.to_wire()).await
        } else {
            ProtocolMetrics::incr(&self.metrics.messages_queued_preopen);
            self.pending.push_back(event);
            Ok(())
        }
    }

    /// Writes one PCM16 frame to the outbound media track.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<(), TransportError> {
        self.link.send_audio(pcm).await
    }

    /// Receives the next link event, maintaining channel-open state
    /// and discarding the queue on disconnect.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        let event = self.events.recv().await?;
        match &event {
            LinkEvent::ChannelOpen => {
                self.channel_open = true;
                if let Err(err) = self.flush_pending().await {
                    warn!(error = %err, "flush on channel open failed");
                }
            }
            LinkEvent::Disconnected { .. } | LinkEvent::Closed => {
                self.channel_open = false;
                self.path_connected = false;
                let dropped = self.pending.len();
                if dropped > 0 {
                    debug!(dropped, "discarding queued messages on disconnect");
                }
                self.pending.clear();
            }
            _ => {}
        }
        Some(event)
    }

    /// Flushes queued messages strictly in arrival order. Stops at the
    /// first failure, leaving the remainder queued.
    async fn flush_pending(&mut self) -> Result<(), TransportError> {
        while let Some(event) = self.pending.front() {
            let wire = event.to_wire();
            self.link.send_text(wire).await?;
            self.pending.pop_front();
        }
        Ok(())
    }

    /// Tears the connection down. Idempotent; discards the queue.
    pub async fn close(&mut self) {
        self.pending.clear();
        self.channel_open = false;
        self.path_connected = false;
        self.link.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialProvider, StaticCredentialProvider};
    use crate::link::LoopbackProvider;
    use crate::signaling::StaticSignaling;
    use comanda_types::SessionMode;

    async fn fresh_credential() -> SessionCredential {
        StaticCredentialProvider::valid_for("secret", 60_000)
            .fetch("r-1", SessionMode::Employee)
            .await
            .unwrap()
    }

    async fn negotiated(provider: &LoopbackProvider) -> TransportConnection {
        TransportConnection::negotiate(
            provider,
            &StaticSignaling::default(),
            &fresh_credential().await,
            Arc::new(ProtocolMetrics::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn expired_credential_never_reaches_the_link() {
        let provider = LoopbackProvider::new(true);
        let stale = SessionCredential {
            secret: "s".into(),
            expires_at: 1,
        };
        let result = TransportConnection::negotiate(
            &provider,
            &StaticSignaling::default(),
            &stale,
            Arc::new(ProtocolMetrics::default()),
        )
        .await;
        assert!(matches!(result, Err(TransportError::CredentialExpired)));
        assert_eq!(provider.created(), 0, "no negotiation was attempted");
    }

    #[tokio::test]
    async fn negotiation_applies_the_answer() {
        let provider = LoopbackProvider::new(true);
        let mut connection = negotiated(&provider).await;
        connection
            .await_ready(Duration::from_secs(1))
            .await
            .unwrap();

        let remote = provider.remote(0).unwrap();
        assert_eq!(
            remote.applied_answer().as_deref(),
            Some("v=0\r\ns=loopback-answer\r\n")
        );
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn messages_sent_pre_open_flush_in_order_exactly_once() {
        let provider = LoopbackProvider::new(false);
        let metrics = Arc::new(ProtocolMetrics::default());
        let mut connection = TransportConnection::negotiate(
            &provider,
            &StaticSignaling::default(),
            &fresh_credential().await,
            Arc::clone(&metrics),
        )
        .await
        .unwrap();

        // Three sends while the channel is not open.
        connection
            .send(ClientEvent::InputAudioBufferClear)
            .await
            .unwrap();
        connection
            .send(ClientEvent::InputAudioBufferCommit)
            .await
            .unwrap();
        connection
            .send(ClientEvent::ResponseCancel)
            .await
            .unwrap();
        assert_eq!(connection.queued(), 3);
        assert_eq!(metrics.snapshot().messages_queued_preopen, 3);

        // The channel opens; await_ready flushes the queue.
        let remote = provider.remote(0).unwrap();
        remote.open();
        connection
            .await_ready(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(
            remote.sent(),
            vec![
                "{\"type\":\"input_audio_buffer.clear\"}".to_string(),
                "{\"type\":\"input_audio_buffer.commit\"}".to_string(),
                "{\"type\":\"response.cancel\"}".to_string(),
            ]
        );
        assert_eq!(connection.queued(), 0);

        // Later sends go direct, after the queued ones.
        connection
            .send(ClientEvent::ResponseCreate { options: None })
            .await
            .unwrap();
        assert_eq!(remote.sent().len(), 4);
        assert_eq!(remote.sent()[3], "{\"type\":\"response.create\"}");
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_times_out_instead_of_hanging() {
        let provider = LoopbackProvider::new(false);
        let mut connection = negotiated(&provider).await;

        // Nobody ever opens the channel.
        let result = connection.await_ready(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(TransportError::NegotiationTimeout)));
    }

    #[tokio::test]
    async fn disconnect_discards_queued_messages() {
        let provider = LoopbackProvider::new(true);
        let mut connection = negotiated(&provider).await;
        connection
            .await_ready(Duration::from_secs(1))
            .await
            .unwrap();
        // Drain the readiness events the remote produced on open.
        // (PathConnected/ChannelOpen were consumed by await_ready.)

        let remote = provider.remote(0).unwrap();
        remote.drop_connection("network lost");
        let event = connection.next_event().await.unwrap();
        assert!(matches!(event, LinkEvent::Disconnected { .. }));
        assert!(!connection.is_open());

        // A send after the drop queues again rather than erroring…
        connection
            .send(ClientEvent::InputAudioBufferClear)
            .await
            .unwrap();
        assert_eq!(connection.queued(), 1);
        // …and close discards it: nothing is replayed across a
        // reconnect boundary.
        connection.close().await;
        assert_eq!(connection.queued(), 0);
    }

    #[tokio::test]
    async fn frames_arriving_during_negotiation_are_not_lost() {
        let provider = LoopbackProvider::new(false);
        let mut connection = negotiated(&provider).await;

        let remote = provider.remote(0).unwrap();
        // A frame lands before the readiness events are even seen; it
        // must be backlogged, not dropped.
        remote.push_frame("{\"type\":\"session.created\"}");
        remote.open();
        connection
            .await_ready(Duration::from_secs(1))
            .await
            .unwrap();

        // A frame arriving after readiness queues behind the backlog.
        remote.push_frame("{\"type\":\"later\"}");
        assert_eq!(
            connection.next_event().await,
            Some(LinkEvent::Message("{\"type\":\"session.created\"}".into()))
        );
        assert_eq!(
            connection.next_event().await,
            Some(LinkEvent::Message("{\"type\":\"later\"}".into()))
        );
    }
}
