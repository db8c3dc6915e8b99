//! Audio capture recorder
//!
//! A [`Recorder`] turns one start/stop span of an [`InputStream`] into a
//! [`FinishedCapture`], which is encoded into a [`CapturedUtterance`] off the
//! async workers. Manual and hands-free recorders share a [`CaptureLock`], so
//! only one of them can be capturing at a time.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::device::{InputStream, Microphone, RawCapture};
use crate::{lock, Error, Result};

/// How often the manual recording clock is published.
const ELAPSED_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Manual,
    HandsFree,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Manual => write!(f, "manual"),
            CaptureMode::HandsFree => write!(f, "hands-free"),
        }
    }
}

/// One encoded recording, from start to stop.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedUtterance {
    audio: Vec<u8>,
    duration: Duration,
    mode: CaptureMode,
}

impl CapturedUtterance {
    pub fn new(audio: Vec<u8>, duration: Duration, mode: CaptureMode) -> Self {
        Self { audio, duration, mode }
    }

    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    pub fn len(&self) -> usize {
        self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }
}

/// A stopped recording whose audio has not been encoded yet.
#[derive(Debug)]
pub struct FinishedCapture {
    raw: RawCapture,
    duration: Duration,
    mode: CaptureMode,
}

impl FinishedCapture {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Encodes the audio on the blocking pool.
    ///
    /// Returns `None` when no bytes were captured.
    pub async fn encode(self) -> Result<Option<CapturedUtterance>> {
        let audio = self.raw.encode().await?;
        if audio.is_empty() {
            tracing::warn!("{} recording captured no audio, discarding", self.mode);
            return Ok(None);
        }
        tracing::debug!(
            "{} recording encoded: {} bytes, {}ms",
            self.mode,
            audio.len(),
            self.duration.as_millis()
        );
        Ok(Some(CapturedUtterance::new(audio, self.duration, self.mode)))
    }
}

/// Which recorder, if any, currently owns the capture device.
#[derive(Debug, Clone, Default)]
pub struct CaptureLock {
    active: Arc<Mutex<Option<CaptureMode>>>,
}

impl CaptureLock {
    pub fn active(&self) -> Option<CaptureMode> {
        *lock(&self.active)
    }

    fn acquire(&self, mode: CaptureMode) -> Result<()> {
        let mut active = lock(&self.active);
        match *active {
            Some(other) if other != mode => Err(Error::CaptureConflict { active: other }),
            _ => {
                *active = Some(mode);
                Ok(())
            }
        }
    }

    fn release(&self, mode: CaptureMode) {
        let mut active = lock(&self.active);
        if *active == Some(mode) {
            *active = None;
        }
    }
}

pub struct Recorder {
    mode: CaptureMode,
    lock: CaptureLock,
    started_at: Option<Instant>,
}

impl Recorder {
    pub fn new(mode: CaptureMode, lock: CaptureLock) -> Self {
        Self {
            mode,
            lock,
            started_at: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start(&mut self, stream: &mut dyn InputStream) -> Result<()> {
        if self.is_recording() {
            return Ok(());
        }
        self.lock.acquire(self.mode)?;
        if let Err(e) = stream.begin_capture() {
            self.lock.release(self.mode);
            return Err(e);
        }
        self.started_at = Some(Instant::now());
        tracing::debug!("{} recording started", self.mode);
        Ok(())
    }

    /// Ends the recording and releases the capture lock.
    ///
    /// Returns `None` when nothing was recording.
    pub fn stop(&mut self, stream: &mut dyn InputStream) -> Result<Option<FinishedCapture>> {
        let Some(started_at) = self.started_at.take() else {
            return Ok(None);
        };
        self.lock.release(self.mode);
        let raw = stream.end_capture()?;
        let duration = started_at.elapsed();
        tracing::debug!("{} recording stopped after {}ms", self.mode, duration.as_millis());
        Ok(Some(FinishedCapture {
            raw,
            duration,
            mode: self.mode,
        }))
    }

    /// Drops the current recording without producing an utterance.
    pub fn abort(&mut self, stream: &mut dyn InputStream) {
        if self.started_at.take().is_none() {
            return;
        }
        self.lock.release(self.mode);
        if let Err(e) = stream.end_capture() {
            tracing::debug!("aborted {} recording: {}", self.mode, e);
        }
        tracing::debug!("{} recording aborted", self.mode);
    }
}

/// Push-to-talk recorder.
///
/// Opens the microphone on `start` and releases it on `stop`. While recording,
/// the elapsed time is published once per second for display.
pub struct ManualRecorder {
    microphone: Arc<dyn Microphone>,
    recorder: Recorder,
    stream: Option<Box<dyn InputStream>>,
    elapsed: Arc<watch::Sender<Duration>>,
    clock: Option<CancellationToken>,
}

impl ManualRecorder {
    pub fn new(microphone: Arc<dyn Microphone>, lock: CaptureLock) -> Self {
        let (elapsed, _) = watch::channel(Duration::ZERO);
        Self {
            microphone,
            recorder: Recorder::new(CaptureMode::Manual, lock),
            stream: None,
            elapsed: Arc::new(elapsed),
            clock: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn elapsed(&self) -> watch::Receiver<Duration> {
        self.elapsed.subscribe()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            return Ok(());
        }
        if let Some(active) = self.recorder.lock.active() {
            return Err(Error::CaptureConflict { active });
        }
        let mut stream = self.microphone.open()?;
        self.recorder.start(stream.as_mut())?;
        self.stream = Some(stream);
        self.start_clock();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<Option<FinishedCapture>> {
        self.stop_clock();
        let Some(mut stream) = self.stream.take() else {
            return Ok(None);
        };
        self.recorder.stop(stream.as_mut())
    }

    /// Stops without producing an utterance and releases the microphone.
    pub fn abort(&mut self) {
        self.stop_clock();
        if let Some(mut stream) = self.stream.take() {
            self.recorder.abort(stream.as_mut());
        }
    }

    fn start_clock(&mut self) {
        let token = CancellationToken::new();
        self.clock = Some(token.clone());
        let elapsed = self.elapsed.clone();
        elapsed.send_replace(Duration::ZERO);
        let started_at = Instant::now();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(started_at + ELAPSED_TICK, ELAPSED_TICK);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        elapsed.send_replace(started_at.elapsed());
                    }
                }
            }
        });
    }

    fn stop_clock(&mut self) {
        if let Some(token) = self.clock.take() {
            token.cancel();
        }
    }
}

impl Drop for ManualRecorder {
    fn drop(&mut self) {
        self.stop_clock();
    }
}
