//! Volume-gated voice activity detection
//!
//! [`VoiceActivityState`] is the pure speech/silence state machine: it is fed
//! one energy sample at a time and reports transitions. [`VadEngine`] owns the
//! microphone in hands-free mode, samples it on a fixed cadence, and turns
//! those transitions into hands-free recordings handed to an [`UtteranceSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::{InputStream, Microphone};
use crate::pipeline::{PipelineOutcome, UtteranceSink};
use crate::playback::PlaybackQueue;
use crate::recorder::{CaptureLock, CaptureMode, FinishedCapture, Recorder};
use crate::session::{Mode, Session};
use crate::{lock, Result};

/// Detection thresholds for hands-free mode
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Energy above which a sample counts as speech, on a 0-100 scale
    pub volume_threshold: f32,

    /// How long energy must stay at or below the threshold to end an utterance
    pub silence_timeout: Duration,

    /// Utterances with less speech than this are discarded
    ///
    /// Measured from the first loud sample to the first sample of the trailing
    /// silence, plus one `sample_interval` for the onset that fell somewhere in
    /// the period before the first loud sample.
    pub min_speech_duration: Duration,

    /// Utterances whose encoded size is below this are discarded
    pub min_utterance_bytes: usize,

    /// Sampling period
    pub sample_interval: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 15.0,
            silence_timeout: Duration::from_millis(1000),
            min_speech_duration: Duration::from_millis(300),
            min_utterance_bytes: 1000,
            sample_interval: Duration::from_millis(16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadPhase {
    Idle,
    Speaking,
    TrailingSilence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    None,
    SpeechStarted,
    /// Sustained silence ended the utterance after `speech` of speaking.
    SpeechEnded { speech: Duration },
}

/// Speech/silence tracking for one stream of samples.
///
/// `silence_started_at` is only ever set while `is_speaking` is true.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceActivityState {
    is_speaking: bool,
    speech_started_at: Option<Instant>,
    silence_started_at: Option<Instant>,
    is_suspended: bool,
}

impl VoiceActivityState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn speech_started_at(&self) -> Option<Instant> {
        self.speech_started_at
    }

    pub fn silence_started_at(&self) -> Option<Instant> {
        self.silence_started_at
    }

    pub fn is_suspended(&self) -> bool {
        self.is_suspended
    }

    pub fn phase(&self) -> VadPhase {
        match (self.is_speaking, self.silence_started_at) {
            (false, _) => VadPhase::Idle,
            (true, None) => VadPhase::Speaking,
            (true, Some(_)) => VadPhase::TrailingSilence,
        }
    }

    /// Freezes or unfreezes transitions. Sampling may continue meanwhile.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.is_suspended = suspended;
    }

    /// Returns to idle, keeping the suspension flag.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.speech_started_at = None;
        self.silence_started_at = None;
    }

    /// Feeds one energy sample taken at `now`.
    pub fn observe(&mut self, level: f32, now: Instant, config: &VadConfig) -> VadTransition {
        if self.is_suspended {
            return VadTransition::None;
        }
        let loud = level > config.volume_threshold;
        match (self.is_speaking, loud) {
            (false, false) => VadTransition::None,
            (false, true) => {
                self.is_speaking = true;
                self.speech_started_at = Some(now);
                self.silence_started_at = None;
                VadTransition::SpeechStarted
            }
            (true, true) => {
                self.silence_started_at = None;
                VadTransition::None
            }
            (true, false) => {
                let silence_started_at = *self.silence_started_at.get_or_insert(now);
                if now.duration_since(silence_started_at) < config.silence_timeout {
                    return VadTransition::None;
                }
                let speech = self
                    .speech_started_at
                    .map(|started| silence_started_at.duration_since(started) + config.sample_interval)
                    .unwrap_or_default();
                self.reset();
                VadTransition::SpeechEnded { speech }
            }
        }
    }
}

struct Capture {
    stream: Option<Box<dyn InputStream>>,
    recorder: Recorder,
    cancel: Option<CancellationToken>,
}

struct Inner {
    config: VadConfig,
    microphone: Arc<dyn Microphone>,
    sink: Arc<dyn UtteranceSink>,
    session: Session,
    playback: PlaybackQueue,
    capture: Mutex<Capture>,
    state: Mutex<VoiceActivityState>,
    level: watch::Sender<f32>,
    /// A finished capture is being encoded and has not reached the sink yet.
    encoding: AtomicBool,
}

/// Hands-free listener.
#[derive(Clone)]
pub struct VadEngine {
    inner: Arc<Inner>,
}

impl VadEngine {
    pub fn new(
        config: VadConfig,
        microphone: Arc<dyn Microphone>,
        sink: Arc<dyn UtteranceSink>,
        session: Session,
        playback: PlaybackQueue,
        capture_lock: CaptureLock,
    ) -> Self {
        let (level, _) = watch::channel(0.0);
        Self {
            inner: Arc::new(Inner {
                config,
                microphone,
                sink,
                session,
                playback,
                capture: Mutex::new(Capture {
                    stream: None,
                    recorder: Recorder::new(CaptureMode::HandsFree, capture_lock),
                    cancel: None,
                }),
                state: Mutex::new(VoiceActivityState::new()),
                level,
                encoding: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.inner.capture).cancel.is_some()
    }

    /// Latest sampled energy, for a level meter.
    pub fn level(&self) -> watch::Receiver<f32> {
        self.inner.level.subscribe()
    }

    pub fn state(&self) -> VoiceActivityState {
        lock(&self.inner.state).clone()
    }

    /// Acquires the microphone and starts listening.
    ///
    /// On failure nothing stays allocated and the session falls back to
    /// manual mode.
    pub fn enable(&self) -> Result<()> {
        let token = {
            let mut capture = lock(&self.inner.capture);
            if capture.cancel.is_some() {
                return Ok(());
            }
            let stream = match self.inner.microphone.open() {
                Ok(stream) => stream,
                Err(e) => {
                    drop(capture);
                    tracing::error!("hands-free unavailable: {}", e);
                    self.inner.session.set_mode(Mode::Manual);
                    return Err(e);
                }
            };
            let token = CancellationToken::new();
            capture.stream = Some(stream);
            capture.cancel = Some(token.clone());
            token
        };
        lock(&self.inner.state).reset();
        self.inner.session.set_mode(Mode::HandsFree);

        let period = self.inner.config.sample_interval;
        tokio::spawn(listen(Arc::downgrade(&self.inner), token, period));
        tracing::info!(
            "hands-free listening, threshold={} silence={}ms",
            self.inner.config.volume_threshold,
            self.inner.config.silence_timeout.as_millis()
        );
        Ok(())
    }

    /// Stops listening and releases the microphone before returning.
    ///
    /// A recording in progress is dropped.
    pub fn disable(&self) {
        let stream = {
            let mut capture = lock(&self.inner.capture);
            let Some(token) = capture.cancel.take() else {
                return;
            };
            token.cancel();
            let Capture { stream, recorder, .. } = &mut *capture;
            let mut stream = stream.take();
            if let Some(stream) = stream.as_mut() {
                recorder.abort(stream.as_mut());
            }
            stream
        };
        drop(stream);
        lock(&self.inner.state).reset();
        self.inner.level.send_replace(0.0);
        if self.inner.session.mode() == Mode::HandsFree {
            self.inner.session.set_mode(Mode::Manual);
        }
        tracing::info!("hands-free stopped");
    }
}

async fn listen(inner: Weak<Inner>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.sample(&token);
            }
        }
    }
    tracing::debug!("vad loop exited");
}

impl Inner {
    fn sample(self: &Arc<Self>, token: &CancellationToken) {
        let finished = {
            let mut capture = lock(&self.capture);
            // `disable` cancels under this lock.
            if token.is_cancelled() {
                return;
            }
            let Capture { stream, recorder, .. } = &mut *capture;
            let Some(stream) = stream.as_mut() else {
                return;
            };

            let level = stream.level();
            self.level.send_replace(level);

            let suspended = self.session.pipeline_in_flight()
                || self.playback.is_playing()
                || self.encoding.load(Ordering::SeqCst);
            let transition = {
                let mut state = lock(&self.state);
                if state.is_suspended() != suspended {
                    tracing::debug!("vad {}", if suspended { "suspended" } else { "resumed" });
                    state.set_suspended(suspended);
                }
                state.observe(level, Instant::now(), &self.config)
            };

            match transition {
                VadTransition::None => None,
                VadTransition::SpeechStarted => {
                    tracing::debug!("speech started, level={:.1}", level);
                    if let Err(e) = recorder.start(stream.as_mut()) {
                        tracing::warn!("could not start hands-free capture: {}", e);
                        lock(&self.state).reset();
                    }
                    None
                }
                VadTransition::SpeechEnded { speech } => {
                    tracing::debug!("speech ended after {}ms", speech.as_millis());
                    match recorder.stop(stream.as_mut()) {
                        Ok(finished) => finished.map(|finished| (finished, speech)),
                        Err(e) => {
                            tracing::warn!("hands-free capture failed: {}", e);
                            None
                        }
                    }
                }
            }
        };

        let Some((finished, speech)) = finished else {
            return;
        };
        if speech < self.config.min_speech_duration {
            tracing::info!(
                "discarding utterance: {}ms of speech is below {}ms",
                speech.as_millis(),
                self.config.min_speech_duration.as_millis()
            );
            return;
        }
        self.encoding.store(true, Ordering::SeqCst);
        tokio::spawn(forward(self.clone(), finished, token.clone()));
    }

    /// Encodes the capture and hands it to the sink, unless listening was
    /// stopped meanwhile.
    async fn hand_off(
        &self,
        finished: FinishedCapture,
        token: &CancellationToken,
    ) -> Option<BoxFuture<'static, Result<PipelineOutcome>>> {
        let utterance = match finished.encode().await {
            Ok(Some(utterance)) => utterance,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("hands-free capture failed: {}", e);
                return None;
            }
        };
        if utterance.len() < self.config.min_utterance_bytes {
            tracing::info!(
                "discarding utterance: {} bytes is below {}",
                utterance.len(),
                self.config.min_utterance_bytes
            );
            return None;
        }
        if token.is_cancelled() {
            tracing::debug!("hands-free stopped while encoding, dropping utterance");
            return None;
        }
        Some(self.sink.submit(utterance))
    }
}

async fn forward(inner: Arc<Inner>, finished: FinishedCapture, token: CancellationToken) {
    let outcome = inner.hand_off(finished, &token).await;
    // The sink has claimed its request by now, so suspension carries over.
    inner.encoding.store(false, Ordering::SeqCst);
    let Some(outcome) = outcome else {
        return;
    };
    match outcome.await {
        Ok(outcome) => tracing::info!("hands-free turn done: {:?}", outcome.transcript()),
        Err(e) => tracing::warn!("hands-free turn failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::device::fakes::{FakeMicrophone, FakeSpeaker};
    use crate::playback::PlaybackChunk;
    use crate::recorder::CapturedUtterance;
    use crate::Error;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// Feeds `(level, duration)` runs at 16ms steps and collects transitions.
    fn drive(runs: &[(f32, u64)]) -> Vec<VadTransition> {
        let config = VadConfig::default();
        let mut state = VoiceActivityState::new();
        let start = Instant::now();
        let mut at = Duration::ZERO;
        let mut transitions = Vec::new();
        for &(level, millis) in runs {
            let end = at + ms(millis);
            while at < end {
                match state.observe(level, start + at, &config) {
                    VadTransition::None => {}
                    t => transitions.push(t),
                }
                at += ms(16);
            }
        }
        transitions
    }

    #[test]
    fn loud_then_quiet_ends_one_utterance() {
        let transitions = drive(&[(40.0, 304), (0.0, 1100)]);
        assert_eq!(
            transitions,
            vec![
                VadTransition::SpeechStarted,
                VadTransition::SpeechEnded { speech: ms(320) }
            ]
        );
    }

    #[test]
    fn onset_phase_does_not_shorten_speech() {
        let min = VadConfig::default().min_speech_duration;
        for offset in [0, 4, 8, 12] {
            let transitions = drive(&[(0.0, offset), (40.0, 300), (0.0, 1100)]);
            let Some(&VadTransition::SpeechEnded { speech }) = transitions.last() else {
                panic!("offset {}ms: no end in {:?}", offset, transitions);
            };
            assert!(speech >= min, "offset {}ms measured {:?}", offset, speech);

            let transitions = drive(&[(0.0, offset), (40.0, 250), (0.0, 1100)]);
            let Some(&VadTransition::SpeechEnded { speech }) = transitions.last() else {
                panic!("offset {}ms: no end in {:?}", offset, transitions);
            };
            assert!(speech < min, "offset {}ms measured {:?}", offset, speech);
        }
    }

    #[test]
    fn short_dips_do_not_end_speech() {
        let transitions = drive(&[(40.0, 320), (0.0, 640), (40.0, 320), (0.0, 960), (40.0, 160)]);
        assert_eq!(transitions, vec![VadTransition::SpeechStarted]);
    }

    #[test]
    fn threshold_is_exclusive() {
        assert!(drive(&[(15.0, 2000)]).is_empty());
        assert_eq!(drive(&[(15.1, 16)]), vec![VadTransition::SpeechStarted]);
    }

    #[test]
    fn silence_only_counts_while_speaking() {
        let config = VadConfig::default();
        let mut state = VoiceActivityState::new();
        let now = Instant::now();
        state.observe(0.0, now, &config);
        assert_eq!(state.silence_started_at(), None);
        assert_eq!(state.phase(), VadPhase::Idle);

        state.observe(50.0, now, &config);
        assert_eq!(state.phase(), VadPhase::Speaking);
        state.observe(0.0, now + ms(16), &config);
        assert_eq!(state.phase(), VadPhase::TrailingSilence);
        state.observe(50.0, now + ms(32), &config);
        assert_eq!(state.phase(), VadPhase::Speaking);
        assert_eq!(state.silence_started_at(), None);
    }

    #[test]
    fn suspension_freezes_transitions() {
        let config = VadConfig::default();
        let mut state = VoiceActivityState::new();
        let now = Instant::now();
        state.set_suspended(true);
        assert_eq!(state.observe(90.0, now, &config), VadTransition::None);
        assert!(!state.is_speaking());

        state.set_suspended(false);
        assert_eq!(state.observe(90.0, now, &config), VadTransition::SpeechStarted);
        state.set_suspended(true);
        assert_eq!(state.observe(0.0, now + ms(5000), &config), VadTransition::None);
        assert!(state.is_speaking());
    }

    /// Records utterances. With a session attached it also marks the request
    /// in flight, leaving the test to settle it.
    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<CapturedUtterance>>,
        claims: Option<Session>,
    }

    impl RecordingSink {
        fn received(&self) -> Vec<CapturedUtterance> {
            lock(&self.received).clone()
        }
    }

    impl UtteranceSink for RecordingSink {
        fn submit(&self, utterance: CapturedUtterance) -> BoxFuture<'static, Result<PipelineOutcome>> {
            lock(&self.received).push(utterance);
            if let Some(session) = &self.claims {
                session.begin_pipeline();
            }
            async { Ok(PipelineOutcome::new("hi", "hello", 0, Duration::ZERO)) }.boxed()
        }
    }

    struct Rig {
        engine: VadEngine,
        mic: FakeMicrophone,
        sink: Arc<RecordingSink>,
        session: Session,
        playback: PlaybackQueue,
        speaker: FakeSpeaker,
        capture_lock: CaptureLock,
    }

    fn rig(capture_bytes: usize) -> Rig {
        rig_with(VadConfig::default(), capture_bytes, false)
    }

    fn rig_with(config: VadConfig, capture_bytes: usize, claims: bool) -> Rig {
        let mic = FakeMicrophone::new(capture_bytes);
        let session = Session::new();
        let sink = Arc::new(RecordingSink {
            claims: claims.then(|| session.clone()),
            ..RecordingSink::default()
        });
        let capture_lock = CaptureLock::default();
        let speaker = FakeSpeaker::new(ms(800));
        let playback = PlaybackQueue::new(Arc::new(speaker.clone()));
        let engine = VadEngine::new(
            config,
            Arc::new(mic.clone()),
            sink.clone(),
            session.clone(),
            playback.clone(),
            capture_lock.clone(),
        );
        Rig {
            engine,
            mic,
            sink,
            session,
            playback,
            speaker,
            capture_lock,
        }
    }

    async fn speak(rig: &Rig, speech: u64, silence: u64) {
        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(speech)).await;
        rig.mic.set_level(0.0);
        tokio::time::sleep(ms(silence)).await;
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(ms(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn speech_then_silence_forwards_exactly_one_utterance() {
        let rig = rig(4000);
        rig.engine.enable().unwrap();
        assert_eq!(rig.session.mode(), Mode::HandsFree);

        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(300)).await;
        rig.mic.set_level(0.0);
        tokio::time::sleep(ms(1100)).await;

        let received = rig.sink.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].mode(), CaptureMode::HandsFree);
        assert!(received[0].duration() >= ms(300));
        assert_eq!(received[0].len(), 4000);

        tokio::time::sleep(ms(3000)).await;
        assert_eq!(rig.sink.received().len(), 1);
        assert_eq!(rig.capture_lock.active(), None);
        assert!(!rig.engine.state().is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn below_threshold_utterances_are_dropped() {
        let rig = rig(999);
        rig.engine.enable().unwrap();
        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(600)).await;
        rig.mic.set_level(0.0);
        tokio::time::sleep(ms(1200)).await;
        assert!(rig.sink.received().is_empty());

        let short = self::rig(4000);
        short.engine.enable().unwrap();
        short.mic.set_level(40.0);
        tokio::time::sleep(ms(100)).await;
        short.mic.set_level(0.0);
        tokio::time::sleep(ms(1200)).await;
        assert!(short.sink.received().is_empty());
        assert_eq!(short.capture_lock.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_capture_while_pipeline_in_flight() {
        let rig = rig(4000);
        rig.engine.enable().unwrap();
        rig.session.begin_pipeline();

        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(500)).await;
        assert!(rig.engine.state().is_suspended());
        assert!(!rig.engine.state().is_speaking());
        assert_eq!(*rig.engine.level().borrow(), 40.0);
        rig.mic.set_level(0.0);
        tokio::time::sleep(ms(1500)).await;
        assert!(rig.sink.received().is_empty());

        rig.session.finish_pipeline(None);
        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(500)).await;
        rig.mic.set_level(0.0);
        tokio::time::sleep(ms(1500)).await;
        assert_eq!(rig.sink.received().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn onset_between_samples_still_forwards() {
        for offset in [0, 4, 8, 12] {
            let rig = rig(4000);
            rig.engine.enable().unwrap();
            tokio::time::sleep(ms(offset)).await;
            speak(&rig, 300, 1100).await;
            assert_eq!(rig.sink.received().len(), 1, "onset at +{}ms", offset);
            rig.engine.disable();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn listening_resumes_only_after_the_reply_has_played() {
        let rig = rig_with(VadConfig::default(), 4000, true);
        rig.engine.enable().unwrap();

        speak(&rig, 400, 1100).await;
        assert_eq!(rig.sink.received().len(), 1);
        assert!(rig.session.pipeline_in_flight());

        // The reply is queued and the request settles while it is still playing.
        rig.playback.enqueue(PlaybackChunk::new(0, "one", vec![1]));
        rig.playback.enqueue(PlaybackChunk::new(1, "two", vec![2]));
        rig.session.finish_pipeline(None);
        assert!(rig.playback.is_playing());

        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(1000)).await;
        assert!(rig.playback.is_playing());
        assert!(rig.engine.state().is_suspended());
        assert!(!rig.engine.state().is_speaking());
        assert_eq!(rig.capture_lock.active(), None);

        let mut playing = rig.playback.subscribe();
        playing.wait_for(|playing| !*playing).await.unwrap();
        assert_eq!(rig.speaker.played(), vec![vec![1], vec![2]]);
        assert_eq!(rig.sink.received().len(), 1);

        tokio::time::sleep(ms(50)).await;
        assert!(!rig.engine.state().is_suspended());
        assert!(rig.engine.state().is_speaking());
        assert_eq!(rig.capture_lock.active(), Some(CaptureMode::HandsFree));

        speak(&rig, 400, 1100).await;
        assert_eq!(rig.sink.received().len(), 2);
        assert!(rig.session.pipeline_in_flight());
    }

    fn quick_config() -> VadConfig {
        VadConfig {
            silence_timeout: ms(100),
            min_speech_duration: ms(50),
            min_utterance_bytes: 0,
            sample_interval: ms(5),
            ..VadConfig::default()
        }
    }

    #[tokio::test]
    async fn sampling_continues_while_a_capture_encodes() {
        let rig = rig_with(quick_config(), 4000, false);
        rig.mic.hold_encoding.store(true, Ordering::SeqCst);
        rig.engine.enable().unwrap();

        speak(&rig, 150, 0).await;
        eventually(|| rig.mic.encodes_started.load(Ordering::SeqCst) == 1).await;
        assert_eq!(rig.capture_lock.active(), None);

        let mut level = rig.engine.level();
        rig.mic.set_level(50.0);
        tokio::time::timeout(ms(500), level.wait_for(|level| *level == 50.0))
            .await
            .unwrap()
            .unwrap();
        // Nothing new is captured until the pending one reaches the sink.
        assert!(rig.engine.state().is_suspended());
        assert!(!rig.engine.state().is_speaking());
        assert!(rig.sink.received().is_empty());

        rig.mic.set_level(0.0);
        rig.mic.hold_encoding.store(false, Ordering::SeqCst);
        eventually(|| rig.sink.received().len() == 1).await;
        assert_eq!(rig.sink.received()[0].len(), 4000);
        eventually(|| !rig.engine.state().is_suspended()).await;
    }

    #[tokio::test]
    async fn disable_does_not_wait_for_encoding() {
        let rig = rig_with(quick_config(), 4000, false);
        rig.mic.hold_encoding.store(true, Ordering::SeqCst);
        rig.engine.enable().unwrap();

        speak(&rig, 150, 0).await;
        eventually(|| rig.mic.encodes_started.load(Ordering::SeqCst) == 1).await;

        rig.engine.disable();
        assert_eq!(rig.mic.open_streams.load(Ordering::SeqCst), 0);
        assert_eq!(rig.session.mode(), Mode::Manual);

        rig.mic.hold_encoding.store(false, Ordering::SeqCst);
        tokio::time::sleep(ms(100)).await;
        assert!(rig.sink.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn microphone_failure_leaves_nothing_allocated() {
        let rig = rig(4000);
        rig.session.set_mode(Mode::HandsFree);
        rig.mic.fail.store(true, Ordering::SeqCst);

        let err = rig.engine.enable().unwrap_err();
        assert!(matches!(err, Error::DeviceAcquisition(_)));
        assert!(!rig.engine.is_enabled());
        assert_eq!(rig.session.mode(), Mode::Manual);
        assert_eq!(rig.mic.open_streams.load(Ordering::SeqCst), 0);

        rig.mic.fail.store(false, Ordering::SeqCst);
        rig.engine.enable().unwrap();
        assert_eq!(rig.mic.open_streams.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_releases_mid_utterance() {
        let rig = rig(4000);
        rig.engine.enable().unwrap();
        rig.mic.set_level(40.0);
        tokio::time::sleep(ms(400)).await;
        assert!(rig.engine.state().is_speaking());
        assert_eq!(rig.capture_lock.active(), Some(CaptureMode::HandsFree));

        rig.engine.disable();
        assert_eq!(rig.mic.open_streams.load(Ordering::SeqCst), 0);
        assert_eq!(rig.capture_lock.active(), None);
        assert!(!rig.engine.state().is_speaking());
        assert_eq!(rig.session.mode(), Mode::Manual);

        rig.mic.set_level(0.0);
        tokio::time::sleep(ms(2000)).await;
        assert!(rig.sink.received().is_empty());
        assert_eq!(*rig.engine.level().borrow(), 0.0);
    }
}
