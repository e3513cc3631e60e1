//! Voicebridge Realtime Library Crate
//!
//! Runs a live voice session against a realtime speech model: local audio
//! capture, credential and offer/answer negotiation, the structured-event
//! channel, and answering the model's tool calls over that channel.
//!
//! Platform specifics (audio devices, the peer connection itself) sit behind
//! the [`media`] and [`transport`] traits. The `webrtc` feature provides a
//! transport built on webrtc-rs.

pub mod channel;
pub mod config;
pub mod error;
pub mod media;
pub mod negotiator;
#[cfg(feature = "webrtc")]
pub mod rtc;
pub mod session;
pub mod transport;

pub use error::SessionError;
pub use session::{SessionController, SessionState};
