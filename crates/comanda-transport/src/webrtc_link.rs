//! Production peer-connection binding over the `webrtc` crate.
//!
//! Builds an RTCPeerConnection carrying one ordered, reliable data
//! channel for the event protocol and one outbound G.711 µ-law audio
//! track fed from the pipeline. Connection and channel lifecycle is
//! translated into [`LinkEvent`]s on the shared event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::TransportError;
use crate::link::{LinkEvent, LinkEvents, LinkProvider, MediaLink};

/// Wire rate of the µ-law audio track.
const TRACK_RATE: u32 = 8_000;

/// Configuration for the WebRTC link.
#[derive(Debug, Clone)]
pub struct WebRtcLinkConfig {
    /// STUN/TURN server URLs for NAT traversal.
    pub ice_urls: Vec<String>,
    /// Label of the event data channel.
    pub channel_label: String,
    /// Sample rate of PCM16 frames handed to `send_audio`.
    pub source_rate: u32,
}

impl Default for WebRtcLinkConfig {
    fn default() -> Self {
        Self {
            ice_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            channel_label: "events".to_string(),
            source_rate: 24_000,
        }
    }
}

fn to_link_err<E: std::fmt::Display>(e: E) -> TransportError {
    TransportError::Link(e.to_string())
}

/// A [`MediaLink`] over a real RTCPeerConnection.
pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    track: Arc<TrackLocalStaticSample>,
    source_rate: u32,
}

impl WebRtcLink {
    /// Builds the peer connection, data channel, and audio track.
    pub async fn new(config: WebRtcLinkConfig) -> Result<(Arc<Self>, LinkEvents), TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(to_link_err)?;
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(to_link_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_urls.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(to_link_err)?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => {
                        let _ = tx.send(LinkEvent::PathConnected);
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                        let _ = tx.send(LinkEvent::Disconnected {
                            reason: format!("peer connection {state}"),
                        });
                    }
                    RTCPeerConnectionState::Closed => {
                        let _ = tx.send(LinkEvent::Closed);
                    }
                    _ => {}
                }
            })
        }));

        let channel = pc
            .create_data_channel(&config.channel_label, None)
            .await
            .map_err(to_link_err)?;

        let tx = event_tx.clone();
        channel.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(LinkEvent::ChannelOpen);
            })
        }));

        let tx = event_tx.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(LinkEvent::Message(text));
                    }
                    Err(_) => warn!("dropping non-utf8 data channel payload"),
                }
            })
        }));

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: TRACK_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "comanda-mic".to_string(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(to_link_err)?;

        Ok((
            Arc::new(Self {
                pc,
                channel,
                track,
                source_rate: config.source_rate,
            }),
            event_rx,
        ))
    }
}

#[async_trait]
impl MediaLink for WebRtcLink {
    async fn create_offer(&self) -> Result<String, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(to_link_err)?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(to_link_err)?;

        // Wait for ICE gathering so the offer carries its candidates.
        let mut gathered = self.pc.gathering_complete_promise().await;
        let _ = gathered.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Link("no local description".to_string()))?;
        Ok(local.sdp)
    }

    async fn apply_answer(&self, answer: &str) -> Result<(), TransportError> {
        let description =
            RTCSessionDescription::answer(answer.to_string()).map_err(to_link_err)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(to_link_err)
    }

    async fn send_text(&self, payload: String) -> Result<(), TransportError> {
        self.channel
            .send_text(payload)
            .await
            .map(|_| ())
            .map_err(to_link_err)
    }

    async fn send_audio(&self, pcm: &[u8]) -> Result<(), TransportError> {
        let samples = comanda_audio::pcm16_to_f32(pcm);
        let resampled = comanda_audio::resample_linear(&samples, self.source_rate, TRACK_RATE);
        let payload: Vec<u8> = resampled
            .iter()
            .map(|s| linear_to_ulaw((s.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect();
        if payload.is_empty() {
            return Ok(());
        }
        let duration = Duration::from_secs_f64(payload.len() as f64 / TRACK_RATE as f64);
        self.track
            .write_sample(&Sample {
                data: Bytes::from(payload),
                duration,
                ..Default::default()
            })
            .await
            .map_err(to_link_err)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
    }
}

/// [`LinkProvider`] producing a fresh WebRTC link per attempt.
pub struct WebRtcProvider {
    config: WebRtcLinkConfig,
}

impl WebRtcProvider {
    /// Creates a provider with the given link configuration.
    pub fn new(config: WebRtcLinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LinkProvider for WebRtcProvider {
    async fn create(&self) -> Result<(Arc<dyn MediaLink>, LinkEvents), TransportError> {
        let (link, events) = WebRtcLink::new(self.config.clone()).await?;
        Ok((link as Arc<dyn MediaLink>, events))
    }
}

/// G.711 µ-law companding of one 16-bit linear sample.
fn linear_to_ulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32_635;

    let mut value = sample as i32;
    let sign: u8 = if value < 0 {
        value = -value;
        0x80
    } else {
        0
    };
    if value > CLIP {
        value = CLIP;
    }
    value += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (value & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((value >> (exponent as i32 + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_encodes_silence_and_extremes() {
        // Encoded silence for µ-law is 0xFF.
        assert_eq!(linear_to_ulaw(0), 0xFF);
        // Full-scale values land at the segment extremes, sign split.
        assert_eq!(linear_to_ulaw(32_767), 0x80);
        assert_eq!(linear_to_ulaw(-32_768), 0x00);
    }

    #[test]
    fn ulaw_is_monotonic_for_positive_samples() {
        let mut previous = linear_to_ulaw(0) & 0x7F;
        for sample in (0..32_000i16).step_by(500) {
            let encoded = linear_to_ulaw(sample) & 0x7F;
            assert!(encoded <= previous, "companding must be monotonic");
            previous = encoded;
        }
    }
}
