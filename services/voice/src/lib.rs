//! Voicebridge Voice Service Library Crate
//!
//! Desktop audio for the realtime voice session: microphone capture and
//! speaker playback on cpal, and the G.711 µ-law conversion the transport
//! expects. The `voicebridge` binary is a thin wrapper around this library.

pub mod audio;
pub mod audio_utils;
