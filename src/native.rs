//! cpal-backed microphone and speaker
//!
//! cpal streams are not `Send` on every host, so each stream lives on its own
//! thread and is dropped there. The handles returned to the engine only share
//! atomics and buffers with the callbacks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use ringbuf::traits::{Consumer, Producer, Split};
use voice_chat_utils as utils;
use voice_chat_utils::audio::{DecodedAudio, CAPTURE_SAMPLE_RATE};

use crate::device::{InputStream, Microphone, RawCapture, Speaker};
use crate::{lock, Error, Result};

/// Extra time allowed past a chunk's decoded length before playback is
/// considered stuck.
const PLAYBACK_GRACE: Duration = Duration::from_millis(500);
const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct CaptureShared {
    level: AtomicU32,
    capturing: AtomicBool,
    samples: Mutex<Vec<f32>>,
}

/// Input device, by name or the host default.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<Box<dyn InputStream>> {
        let shared = Arc::new(CaptureShared::default());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let device_name = self.device_name.clone();
        let callback_shared = shared.clone();
        thread::Builder::new()
            .name("voice-chat-capture".to_string())
            .spawn(move || {
                let stream = match build_input(device_name, callback_shared) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the handle drops its sender.
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("input stream released");
            })
            .map_err(device_error)?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::DeviceAcquisition("capture thread exited".to_string()))??;
        Ok(Box::new(CpalInputStream {
            shared,
            sample_rate,
            _stop: stop_tx,
        }))
    }
}

fn build_input(device_name: Option<String>, shared: Arc<CaptureShared>) -> Result<(cpal::Stream, u32)> {
    let device = utils::device::get_or_default_input(device_name).map_err(device_error)?;
    let supported = device.default_input_config().map_err(device_error)?;
    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let config: StreamConfig = supported.into();

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let mono = utils::audio::downmix(data, channels);
        shared.level.store(utils::audio::level(&mono).to_bits(), Ordering::Relaxed);
        if shared.capturing.load(Ordering::Relaxed) {
            lock(&shared.samples).extend_from_slice(&mono);
        }
    };
    let stream = device
        .build_input_stream(
            &config,
            input_data_fn,
            move |err| tracing::error!("an error occurred on input stream: {}", err),
            None,
        )
        .map_err(device_error)?;
    stream.play().map_err(device_error)?;
    tracing::info!("input: device={:?}, config={:?}", device.name().ok(), &config);
    Ok((stream, sample_rate))
}

struct CpalInputStream {
    shared: Arc<CaptureShared>,
    sample_rate: u32,
    _stop: mpsc::Sender<()>,
}

impl InputStream for CpalInputStream {
    fn level(&mut self) -> f32 {
        f32::from_bits(self.shared.level.load(Ordering::Relaxed))
    }

    fn begin_capture(&mut self) -> Result<()> {
        lock(&self.shared.samples).clear();
        self.shared.capturing.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Encodes to a 16 kHz mono WAV file, or nothing if no samples arrived.
    fn end_capture(&mut self) -> Result<RawCapture> {
        if !self.shared.capturing.swap(false, Ordering::Relaxed) {
            return Err(Error::Capture("not capturing".to_string()));
        }
        let samples = std::mem::take(&mut *lock(&self.shared.samples));
        if samples.is_empty() {
            return Ok(RawCapture::encoded(Vec::new()));
        }
        let sample_rate = self.sample_rate;
        Ok(RawCapture::new(move || {
            let samples = utils::audio::resample(&samples, sample_rate, CAPTURE_SAMPLE_RATE)
                .map_err(|e| Error::Capture(e.to_string()))?;
            utils::audio::samples_to_wav(&samples, CAPTURE_SAMPLE_RATE).map_err(|e| Error::Capture(e.to_string()))
        }))
    }
}

/// Output device for MP3 chunks, by name or the host default.
#[derive(Debug, Clone, Default)]
pub struct CpalSpeaker {
    device_name: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Speaker for CpalSpeaker {
    fn play(&self, audio: Vec<u8>) -> BoxFuture<'static, Result<()>> {
        let device_name = self.device_name.clone();
        async move {
            let decoded = tokio::task::spawn_blocking(move || utils::audio::decode_mp3(&audio))
                .await
                .map_err(playback_error)?
                .map_err(playback_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let _guard = StopOnDrop(stop.clone());
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            thread::Builder::new()
                .name("voice-chat-playback".to_string())
                .spawn(move || {
                    let _ = done_tx.send(render(device_name, decoded, &stop));
                })
                .map_err(playback_error)?;

            done_rx
                .await
                .unwrap_or_else(|_| Err(Error::Playback("playback thread exited".to_string())))
        }
        .boxed()
    }
}

/// Plays `decoded` to the end, or until `stop` is raised.
fn render(device_name: Option<String>, decoded: DecodedAudio, stop: &AtomicBool) -> Result<()> {
    let device = utils::device::get_or_default_output(device_name).map_err(playback_error)?;
    let supported = device.default_output_config().map_err(playback_error)?;
    let channels = supported.channels() as usize;
    let output_rate = supported.sample_rate().0;
    let config: StreamConfig = supported.into();

    let samples = utils::audio::resample(&decoded.samples, decoded.sample_rate, output_rate)
        .map_err(playback_error)?;
    let (mut producer, mut consumer) = utils::audio::shared_buffer(samples.len().max(1)).split();
    producer.push_slice(&samples);

    let drained = Arc::new(AtomicBool::new(false));
    let output_drained = drained.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(channels) {
            let sample = consumer.try_pop();
            if sample.is_none() {
                output_drained.store(true, Ordering::Relaxed);
            }
            frame.fill(sample.unwrap_or(0.0));
        }
    };
    let stream = device
        .build_output_stream(
            &config,
            output_data_fn,
            move |err| tracing::error!("an error occurred on output stream: {}", err),
            None,
        )
        .map_err(playback_error)?;
    stream.play().map_err(playback_error)?;

    let deadline = std::time::Instant::now() + Duration::from_millis(decoded.duration_ms()) + PLAYBACK_GRACE;
    while !drained.load(Ordering::Relaxed) {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("playback interrupted");
            return Ok(());
        }
        if std::time::Instant::now() > deadline {
            return Err(Error::Playback("output device stalled".to_string()));
        }
        thread::sleep(DRAIN_POLL);
    }
    Ok(())
}

fn device_error(e: impl fmt::Display) -> Error {
    Error::DeviceAcquisition(e.to_string())
}

fn playback_error(e: impl fmt::Display) -> Error {
    Error::Playback(e.to_string())
}
