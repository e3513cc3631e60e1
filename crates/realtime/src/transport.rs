//! The peer-connection seam.
//!
//! A [`TransportFactory`] builds one [`PeerTransport`] per session. The
//! transport reports asynchronous happenings (a data channel opened by the
//! remote peer, inbound frames on any channel, loss of the connection) as
//! [`TransportEvent`]s on the sender it was created with.

use crate::media::MediaHandle;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Label of the data channel created locally for model events.
pub const EVENTS_CHANNEL_LABEL: &str = "oai-events";

/// A raw frame received on a data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
}

impl InboundFrame {
    /// The frame's payload as text. Binary payloads are decoded as UTF-8.
    pub fn into_text(self) -> String {
        match self {
            InboundFrame::Text(text) => text,
            InboundFrame::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Something that happened on the transport outside a direct call.
pub enum TransportEvent {
    /// The remote peer opened a data channel.
    DataChannel(Arc<dyn DataChannel>),
    /// A frame arrived on any data channel of the session.
    Message(InboundFrame),
    /// The connection was lost or closed by the peer.
    Disconnected,
}

/// A structured-event link riding alongside the audio.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self);
}

/// One negotiated peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Adds the local tracks and routes remote audio to the playback sink.
    async fn attach_media(&self, media: &MediaHandle) -> Result<()>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    /// Builds an SDP offer that can receive audio.
    async fn create_offer(&self) -> Result<String>;

    async fn set_local_description(&self, sdp: &str) -> Result<()>;

    /// The local description as it should be sent to the peer, once set.
    async fn local_description(&self) -> Option<String>;

    async fn set_remote_description(&self, sdp: &str) -> Result<()>;

    async fn close(&self);
}

/// Builds peer transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_text() {
        let text = InboundFrame::Text("{\"type\":\"x\"}".to_string()).into_text();
        assert_eq!(text, "{\"type\":\"x\"}");

        let binary = InboundFrame::Binary(Bytes::from_static(b"{\"a\":1}")).into_text();
        assert_eq!(binary, "{\"a\":1}");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let text = InboundFrame::Binary(Bytes::from_static(&[b'o', b'k', 0xff])).into_text();
        assert!(text.starts_with("ok"));
    }
}
