//! Local capture and remote playback seams.
//!
//! A [`MediaBridge`] hands the session a [`MediaHandle`] once the microphone is
//! acquired. The handle owns every captured track and the playback sink, and
//! releasing it stops all of them.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One encoded audio frame, either captured locally or received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub payload: Bytes,
    pub duration: Duration,
}

/// A live local capture track.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Stops capture. Stopping an already stopped track does nothing.
    fn stop(&self);

    /// The captured frames. Yields the receiver to the first caller only.
    fn take_frames(&self) -> Option<mpsc::Receiver<AudioFrame>>;
}

/// Plays audio received from the remote peer.
pub trait AudioSink: Send + Sync {
    fn play(&self, frame: AudioFrame);

    fn stop(&self);
}

/// Everything acquired from the local audio devices for one session.
pub struct MediaHandle {
    tracks: Vec<Arc<dyn MediaTrack>>,
    playback: Option<Arc<dyn AudioSink>>,
}

impl MediaHandle {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>, playback: Option<Arc<dyn AudioSink>>) -> Self {
        Self { tracks, playback }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn playback(&self) -> Option<Arc<dyn AudioSink>> {
        self.playback.clone()
    }

    /// Stops every track and the playback sink. Consumes the handle so the
    /// resources are released exactly once.
    pub fn release(mut self) {
        self.stop_all();
    }

    fn stop_all(&mut self) {
        for track in self.tracks.drain(..) {
            debug!(track = track.id(), "Stopping media track");
            track.stop();
        }
        if let Some(sink) = self.playback.take() {
            sink.stop();
        }
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Acquires the local microphone and playback device.
#[async_trait]
pub trait MediaBridge: Send + Sync {
    async fn acquire(&self) -> Result<MediaHandle>;
}
