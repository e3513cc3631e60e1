//! Local audio devices through cpal.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread for
//! as long as its track or sink is live. Samples cross between the device
//! callbacks and the rest of the process through ring buffers.

use crate::audio_utils::{
    Framer, PCMU_FRAME_LEN, PCMU_SAMPLE_RATE, create_resampler, decode_ulaw_to_f32,
    encode_f32_to_ulaw,
};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rubato::{FastFixedIn, Resampler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use voicebridge_realtime::media::{AudioFrame, AudioSink, MediaBridge, MediaHandle, MediaTrack};

/// Frames buffered between the capture thread and the transport.
const FRAME_QUEUE: usize = 50;

/// Two seconds of audio at any common device rate.
const RING_CAPACITY: usize = 96_000;

const FRAME_DURATION: Duration = Duration::from_millis(20);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Acquires the default input and output devices.
#[derive(Default)]
pub struct CpalMediaBridge;

impl CpalMediaBridge {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaBridge for CpalMediaBridge {
    async fn acquire(&self) -> anyhow::Result<MediaHandle> {
        let mic = MicTrack::open().await?;
        let playback: Option<Arc<dyn AudioSink>> = match SpeakerSink::open().await {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                warn!(error = %e, "No playback device; remote audio will not be heard");
                None
            }
        };
        Ok(MediaHandle::new(vec![Arc::new(mic)], playback))
    }
}

/// Sums interleaved channels down to mono.
fn downmix<T>(data: &[T], channels: usize) -> impl Iterator<Item = f32> + '_
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels.max(1))
        .map(|frame| frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32)
}

/// Reports the outcome of opening a device. Returns false when the opener
/// is no longer waiting, in which case the device thread must exit.
fn signal_ready<T>(ready: oneshot::Sender<T>, outcome: T) -> bool {
    if ready.send(outcome).is_err() {
        debug!("Device opener went away; closing device");
        return false;
    }
    true
}

// --- Capture ---

pub struct MicTrack {
    id: String,
    live: Arc<AtomicBool>,
    frames: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
}

impl MicTrack {
    /// Opens the default input device. Fails when there is no device or the
    /// stream cannot be started.
    async fn open() -> anyhow::Result<Self> {
        let live = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_live = live.clone();
        thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(thread_live, frames_tx, ready_tx))
            .context("Failed to spawn capture thread")?;

        let device = ready_rx
            .await
            .map_err(|_| anyhow!("capture thread exited before opening the microphone"))??;
        info!(%device, "Microphone opened");

        Ok(Self {
            id: "microphone".to_string(),
            live,
            frames: Mutex::new(Some(frames_rx)),
        })
    }
}

impl MediaTrack for MicTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("Microphone stopped");
        }
    }

    fn take_frames(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.lock().ok()?.take()
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
) -> anyhow::Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for sample in downmix(data, channels) {
                if producer.try_push(sample).is_err() {
                    break;
                }
            }
        },
        |err| error!(error = %err, "Audio capture error"),
        None,
    )?;
    Ok(stream)
}

fn open_input(producer: HeapProd<f32>) -> anyhow::Result<(Stream, String, f64)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no input device available"))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = device.default_input_config()?;
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, producer)?,
        SampleFormat::I16 => build_input::<i16>(&device, &config, producer)?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, producer)?,
        other => return Err(anyhow!("unsupported input sample format {other}")),
    };
    stream.play()?;
    Ok((stream, name, config.sample_rate.0 as f64))
}

/// Owns the input stream; resamples to 8 kHz, encodes µ-law, and emits 20 ms
/// frames until the track is stopped or the receiver goes away.
fn capture_thread(
    live: Arc<AtomicBool>,
    frames: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<anyhow::Result<String>>,
) {
    let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
    let opened = open_input(producer).and_then(|(stream, name, rate)| {
        let chunk = (rate / 50.0) as usize;
        let resampler = create_resampler(rate, PCMU_SAMPLE_RATE, chunk)
            .context("Failed to create capture resampler")?;
        Ok((stream, name, chunk, resampler))
    });
    let (stream, chunk, mut resampler) = match opened {
        Ok((stream, name, chunk, resampler)) => {
            if !signal_ready(ready, Ok(name)) {
                return;
            }
            (stream, chunk, resampler)
        }
        Err(e) => {
            signal_ready(ready, Err(e));
            return;
        }
    };
    let mut input = vec![0.0f32; chunk];
    let mut framer = Framer::default();

    'capture: while live.load(Ordering::SeqCst) {
        while consumer.occupied_len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            input.resize(needed, 0.0);
            consumer.pop_slice(&mut input);

            let resampled = match resampler.process(&[&input[..]], None) {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "Capture resampling failed");
                    continue;
                }
            };
            let Some(mono) = resampled.first() else { continue };

            for frame in framer.push(&encode_f32_to_ulaw(mono)) {
                let frame = AudioFrame {
                    payload: Bytes::from(frame),
                    duration: FRAME_DURATION,
                };
                match frames.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => trace!("Frame queue full; dropping frame"),
                    Err(mpsc::error::TrySendError::Closed(_)) => break 'capture,
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    debug!("Capture thread finished");
}

// --- Playback ---

/// Plays µ-law frames from the peer on the default output device.
pub struct SpeakerSink {
    live: Arc<AtomicBool>,
    feed: Mutex<PlaybackFeed>,
}

struct PlaybackFeed {
    producer: HeapProd<f32>,
    resampler: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl PlaybackFeed {
    fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(out) => {
                    if let Some(mono) = out.first() {
                        let written = self.producer.push_slice(mono);
                        if written < mono.len() {
                            trace!(dropped = mono.len() - written, "Playback buffer full");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Playback resampling failed"),
            }
        }
    }
}

impl SpeakerSink {
    async fn open() -> anyhow::Result<Self> {
        let live = Arc::new(AtomicBool::new(true));
        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_live = live.clone();
        thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || playback_thread(thread_live, consumer, ready_tx))
            .context("Failed to spawn playback thread")?;

        let (device, device_rate) = ready_rx
            .await
            .map_err(|_| anyhow!("playback thread exited before opening the speaker"))??;
        info!(%device, rate = device_rate, "Speaker opened");

        let resampler = match create_resampler(PCMU_SAMPLE_RATE, device_rate, PCMU_FRAME_LEN) {
            Ok(resampler) => resampler,
            Err(e) => {
                live.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        Ok(Self {
            live,
            feed: Mutex::new(PlaybackFeed {
                producer,
                resampler,
                pending: Vec::with_capacity(PCMU_FRAME_LEN * 2),
            }),
        })
    }
}

impl AudioSink for SpeakerSink {
    fn play(&self, frame: AudioFrame) {
        if !self.live.load(Ordering::SeqCst) {
            return;
        }
        let samples = decode_ulaw_to_f32(&frame.payload);
        match self.feed.lock() {
            Ok(mut feed) => feed.push(&samples),
            Err(_) => warn!("Playback feed poisoned; dropping frame"),
        }
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("Speaker stopped");
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
) -> anyhow::Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels.max(1)) {
                let value = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                frame.fill(value);
            }
        },
        |err| error!(error = %err, "Audio playback error"),
        None,
    )?;
    Ok(stream)
}

fn open_output(consumer: HeapCons<f32>) -> anyhow::Result<(Stream, String, f64)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = device.default_output_config()?;
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, consumer)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, consumer)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, consumer)?,
        other => return Err(anyhow!("unsupported output sample format {other}")),
    };
    stream.play()?;
    Ok((stream, name, config.sample_rate.0 as f64))
}

fn playback_thread(
    live: Arc<AtomicBool>,
    consumer: HeapCons<f32>,
    ready: oneshot::Sender<anyhow::Result<(String, f64)>>,
) {
    let stream = match open_output(consumer) {
        Ok((stream, name, rate)) => {
            if !signal_ready(ready, Ok((name, rate))) {
                return;
            }
            stream
        }
        Err(e) => {
            signal_ready(ready, Err(e));
            return;
        }
    };

    while live.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("Playback thread finished");
}
