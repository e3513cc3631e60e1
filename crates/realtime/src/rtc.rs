//! Peer transport on webrtc-rs.
//!
//! The media engine only offers G.711 µ-law (PCMU), so captured frames must
//! already be µ-law encoded and the playback sink receives µ-law payloads.

use crate::media::{AudioFrame, MediaHandle};
use crate::transport::{DataChannel, InboundFrame, PeerTransport, TransportEvent, TransportFactory};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// PCMU runs at 8 kHz with one byte per sample.
const PCMU_CLOCK_RATE: u32 = 8000;
const PCMU_PAYLOAD_TYPE: u8 = 0;

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_CLOCK_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Playback duration of a PCMU payload.
fn pcmu_duration(payload_len: usize) -> Duration {
    Duration::from_micros(payload_len as u64 * 1_000_000 / PCMU_CLOCK_RATE as u64)
}

/// Builds one [`RtcPeerTransport`] per session.
pub struct RtcTransportFactory {
    ice_servers: Vec<String>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: pcmu_capability(),
                payload_type: PCMU_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .context("Failed to create peer connection")?,
        );

        let remote_events = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = remote_events.clone();
            Box::pin(async move {
                debug!(label = dc.label(), "Remote peer opened a data channel");
                forward_messages(&dc, events.clone());
                let _ = events.send(TransportEvent::DataChannel(Arc::new(RtcDataChannel { inner: dc })));
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                debug!(%state, "Peer connection state changed");
                if matches!(state, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed) {
                    let _ = events.send(TransportEvent::Disconnected);
                }
            })
        }));

        Ok(Box::new(RtcPeerTransport {
            pc,
            events,
            pumps: CancellationToken::new(),
        }))
    }
}

/// Emits every message received on `dc` as a transport event.
fn forward_messages(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<TransportEvent>) {
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let frame = if msg.is_string {
            InboundFrame::Text(String::from_utf8_lossy(&msg.data).into_owned())
        } else {
            InboundFrame::Binary(msg.data)
        };
        let _ = events.send(TransportEvent::Message(frame));
        Box::pin(async {})
    }));
}

pub struct RtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.inner.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.inner.close().await {
            warn!(error = %e, label = self.inner.label(), "Failed to close data channel");
        }
    }
}

pub struct RtcPeerTransport {
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pumps: CancellationToken,
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn attach_media(&self, media: &MediaHandle) -> Result<()> {
        for track in media.tracks() {
            let Some(mut frames) = track.take_frames() else {
                warn!(track = track.id(), "Track frames already taken; not sending it");
                continue;
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                pcmu_capability(),
                track.id().to_owned(),
                "voicebridge".to_owned(),
            ));
            self.pc
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .context("Failed to add local audio track")?;

            let cancel = self.pumps.child_token();
            let id = track.id().to_owned();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break,
                        frame = frames.recv() => frame,
                    };
                    let Some(frame) = frame else { break };
                    let sample = Sample {
                        data: frame.payload,
                        duration: frame.duration,
                        ..Default::default()
                    };
                    if let Err(e) = local.write_sample(&sample).await {
                        trace!(error = %e, "Dropping audio sample");
                    }
                }
                debug!(track = %id, "Audio pump finished");
            });
        }

        if media.tracks().is_empty() {
            self.pc
                .add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .context("Failed to add receive-only audio transceiver")?;
        }

        if let Some(sink) = media.playback() {
            let cancel = self.pumps.clone();
            self.pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
                let sink = Arc::clone(&sink);
                let cancel = cancel.clone();
                Box::pin(async move {
                    info!("Remote audio track started");
                    loop {
                        let packet = tokio::select! {
                            _ = cancel.cancelled() => break,
                            packet = remote.read_rtp() => packet,
                        };
                        match packet {
                            Ok((packet, _)) => {
                                let duration = pcmu_duration(packet.payload.len());
                                sink.play(AudioFrame {
                                    payload: packet.payload,
                                    duration,
                                });
                            }
                            Err(e) => {
                                debug!(error = %e, "Remote audio track ended");
                                break;
                            }
                        }
                    }
                })
            }));
        }
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .context("Failed to create data channel")?;
        forward_messages(&dc, self.events.clone());
        Ok(Arc::new(RtcDataChannel { inner: dc }))
    }

    async fn create_offer(&self) -> Result<String> {
        Ok(self.pc.create_offer(None).await?.sdp)
    }

    /// Applies the offer and waits for ICE gathering, so the description
    /// sent to the peer carries every candidate.
    async fn set_local_description(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = gathered.recv().await;
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|desc| desc.sdp)
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| anyhow!("remote description rejected: {e}"))
    }

    async fn close(&self) {
        self.pumps.cancel();
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Failed to close peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcmu_duration() {
        assert_eq!(pcmu_duration(160), Duration::from_millis(20));
        assert_eq!(pcmu_duration(0), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_offer_carries_pcmu_and_events_channel() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = RtcTransportFactory::new(vec![]).create(tx).await.unwrap();
        transport.attach_media(&MediaHandle::new(vec![], None)).await.unwrap();
        let channel = transport.create_data_channel("oai-events").await.unwrap();
        assert_eq!(channel.label(), "oai-events");

        let offer = transport.create_offer().await.unwrap();
        assert!(offer.contains("PCMU/8000"));
        assert!(offer.contains("m=application"));
        transport.close().await;
    }
}
