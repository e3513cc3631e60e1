//! The session's structured-event channel.
//!
//! A channel may be created locally and may also be opened by the remote peer.
//! The first one seen is adopted and every later one is ignored, so results
//! never split across two links. Sends go out only on an open adopted channel;
//! anything else is dropped on the floor, never queued.

use crate::transport::{DataChannel, InboundFrame};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use voicebridge_core::protocol::OutboundFrame;

/// What became of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

#[derive(Default)]
pub struct EventChannel {
    channel: Option<Arc<dyn DataChannel>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts `channel` unless one is already adopted. Returns whether it was.
    pub fn adopt(&mut self, channel: Arc<dyn DataChannel>) -> bool {
        if let Some(current) = &self.channel {
            debug!(
                adopted = current.label(),
                ignored = channel.label(),
                "Event channel already adopted; ignoring later channel"
            );
            return false;
        }
        debug!(label = channel.label(), "Adopted event channel");
        self.channel = Some(channel);
        true
    }

    pub fn is_adopted(&self) -> bool {
        self.channel.is_some()
    }

    /// Writes `frame` if the adopted channel is open.
    pub async fn send(&self, frame: &OutboundFrame) -> Delivery {
        let Some(channel) = self.channel.as_ref().filter(|c| c.is_open()) else {
            debug!("No open event channel; dropping outbound frame");
            return Delivery::Dropped;
        };

        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound frame");
                return Delivery::Dropped;
            }
        };

        match channel.send_text(text).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!(error = %e, "Event channel write failed; dropping outbound frame");
                Delivery::Dropped
            }
        }
    }

    /// Closes and forgets the adopted channel.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }

    /// Turns a raw frame into a JSON value. Empty or unparseable frames yield
    /// `None`.
    pub fn decode(frame: InboundFrame) -> Option<Value> {
        let text = frame.into_text();
        if text.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                trace!(error = %e, "Ignoring non-JSON event frame");
                None
            }
        }
    }
}
