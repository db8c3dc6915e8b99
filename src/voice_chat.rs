use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::client::Client;
use crate::config::{Config, ConfigError};
use crate::device::{Microphone, Speaker};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::playback::PlaybackQueue;
use crate::recorder::{CaptureLock, CaptureMode, ManualRecorder};
use crate::session::{Mode, Session};
use crate::vad::VadEngine;
use crate::{lock, Error, Result};

/// The voice engine wired together: one session, one connection, one playback
/// queue, and the two capture paths sharing a microphone.
pub struct VoiceChat {
    config: Config,
    session: Session,
    client: Client,
    pipeline: Pipeline,
    playback: PlaybackQueue,
    vad: VadEngine,
    manual: Mutex<ManualRecorder>,
}

impl VoiceChat {
    pub fn new(config: Config, microphone: Arc<dyn Microphone>, speaker: Arc<dyn Speaker>) -> Self {
        let session = Session::new();
        let playback = PlaybackQueue::new(speaker);
        let client = Client::new(&config, session.clone(), playback.clone());
        let pipeline = Pipeline::new(client.clone(), config.model());
        let capture_lock = CaptureLock::default();
        let vad = VadEngine::new(
            config.vad().clone(),
            microphone.clone(),
            Arc::new(pipeline.clone()),
            session.clone(),
            playback.clone(),
            capture_lock.clone(),
        );
        let manual = ManualRecorder::new(microphone, capture_lock);
        Self {
            config,
            session,
            client,
            pipeline,
            playback,
            vad,
            manual: Mutex::new(manual),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    pub fn vad(&self) -> &VadEngine {
        &self.vad
    }

    pub fn models(&self) -> &[String] {
        self.config.models()
    }

    /// Switches the model used by subsequent requests.
    pub fn select_model(&self, model: &str) -> std::result::Result<(), ConfigError> {
        if !self.config.models().iter().any(|m| m == model) {
            return Err(ConfigError::UnknownModel(model.to_string()));
        }
        tracing::info!("model: {}", model);
        self.pipeline.set_model(model);
        Ok(())
    }

    pub async fn connect(&self) -> Result<()> {
        self.client.connect().await
    }

    pub fn enable_hands_free(&self) -> Result<()> {
        if self.session.mode() == Mode::Disabled {
            return Err(Error::Disabled);
        }
        if lock(&self.manual).is_recording() {
            return Err(Error::CaptureConflict {
                active: CaptureMode::Manual,
            });
        }
        self.vad.enable()
    }

    pub fn disable_hands_free(&self) {
        self.vad.disable();
    }

    /// Starts a push-to-talk recording.
    pub fn start_recording(&self) -> Result<()> {
        match self.session.mode() {
            Mode::Manual => {}
            Mode::HandsFree => {
                return Err(Error::CaptureConflict {
                    active: CaptureMode::HandsFree,
                })
            }
            Mode::Disabled => return Err(Error::Disabled),
        }
        if self.session.pipeline_in_flight() {
            return Err(Error::Busy);
        }
        lock(&self.manual).start()
    }

    /// Stops the push-to-talk recording and runs it through the pipeline.
    ///
    /// Returns `Ok(None)` when nothing was recording or the recording was
    /// discarded as too short or too small.
    pub async fn stop_recording(&self) -> Result<Option<PipelineOutcome>> {
        let finished = lock(&self.manual).stop()?;
        let Some(finished) = finished else {
            return Ok(None);
        };
        let Some(utterance) = finished.encode().await? else {
            return Ok(None);
        };
        let vad = self.config.vad();
        if utterance.duration() < vad.min_speech_duration || utterance.len() < vad.min_utterance_bytes {
            tracing::info!(
                "discarding manual recording: {}ms, {} bytes",
                utterance.duration().as_millis(),
                utterance.len()
            );
            return Ok(None);
        }
        self.pipeline.run(utterance).await.map(Some)
    }

    /// Sends a typed prompt instead of speech.
    ///
    /// Follows the same single-flight rule as recordings: fails with
    /// [`Error::Busy`] while any request is outstanding.
    pub async fn send_text(&self, prompt: &str) -> Result<PipelineOutcome> {
        if self.session.mode() == Mode::Disabled {
            return Err(Error::Disabled);
        }
        self.pipeline.send_text(prompt).await
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.manual).is_recording()
    }

    /// Elapsed time of the manual recording, updated once per second.
    pub fn recording_elapsed(&self) -> watch::Receiver<Duration> {
        lock(&self.manual).elapsed()
    }

    /// Turns voice input off: capture is released before this returns and
    /// queued audio is dropped.
    pub fn clear(&self) {
        self.vad.disable();
        lock(&self.manual).abort();
        self.playback.reset();
        self.session.set_mode(Mode::Disabled);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::device::fakes::{FakeMicrophone, FakeSpeaker};
    use crate::pipeline::UtteranceSink;
    use crate::playback::PlaybackChunk;
    use crate::recorder::CapturedUtterance;

    fn voice_chat(mic: &FakeMicrophone) -> VoiceChat {
        let config = Config::builder()
            .with_url("ws://127.0.0.1:9/ws/voice")
            .with_models(&["llama3.2:1b", "qwen2.5:0.5b"])
            .build()
            .unwrap();
        VoiceChat::new(
            config,
            Arc::new(mic.clone()),
            Arc::new(FakeSpeaker::new(Duration::from_secs(5))),
        )
    }

    #[tokio::test]
    async fn model_must_be_in_catalogue() {
        let chat = voice_chat(&FakeMicrophone::new(2000));
        assert_eq!(chat.pipeline().model(), "llama3.2:1b");
        chat.select_model("qwen2.5:0.5b").unwrap();
        assert_eq!(chat.pipeline().model(), "qwen2.5:0.5b");
        assert!(matches!(
            chat.select_model("gpt-4"),
            Err(ConfigError::UnknownModel(_))
        ));
        assert_eq!(chat.pipeline().model(), "qwen2.5:0.5b");
    }

    #[tokio::test]
    async fn capture_modes_exclude_each_other() {
        let mic = FakeMicrophone::new(2000);
        let chat = voice_chat(&mic);

        chat.start_recording().unwrap();
        assert!(matches!(
            chat.enable_hands_free(),
            Err(Error::CaptureConflict { active: CaptureMode::Manual })
        ));
        assert_eq!(chat.stop_recording().await.unwrap(), None);
        assert_eq!(mic.open_streams.load(Ordering::SeqCst), 0);

        chat.enable_hands_free().unwrap();
        assert!(matches!(
            chat.start_recording(),
            Err(Error::CaptureConflict { active: CaptureMode::HandsFree })
        ));
        chat.disable_hands_free();
        assert_eq!(chat.session().mode(), Mode::Manual);
        assert_eq!(mic.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn busy_while_pipeline_in_flight() {
        let chat = voice_chat(&FakeMicrophone::new(2000));
        chat.session().begin_pipeline();
        assert!(matches!(chat.start_recording(), Err(Error::Busy)));
        assert!(!chat.session().snapshot().record_enabled());
        chat.session().finish_pipeline(Some("boom"));
        assert!(chat.session().snapshot().record_enabled());
        chat.start_recording().unwrap();
    }

    #[tokio::test]
    async fn typed_prompt_follows_single_flight() {
        let chat = voice_chat(&FakeMicrophone::new(2000));
        assert!(matches!(chat.send_text("").await, Err(Error::EmptyPrompt)));

        let utterance = CapturedUtterance::new(vec![1; 2048], Duration::from_millis(800), CaptureMode::Manual);
        let round_trip = chat.pipeline().submit(utterance);
        assert!(matches!(chat.send_text("hello").await, Err(Error::Busy)));
        drop(round_trip);
        assert!(!chat.session().pipeline_in_flight());

        let err = chat.send_text("hello").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "{:?}", err);
        assert!(!chat.session().pipeline_in_flight());

        chat.clear();
        assert!(matches!(chat.send_text("hello").await, Err(Error::Disabled)));
    }

    #[tokio::test]
    async fn clear_releases_everything() {
        let mic = FakeMicrophone::new(2000);
        let chat = voice_chat(&mic);
        chat.enable_hands_free().unwrap();
        chat.playback().enqueue(PlaybackChunk::new(0, "one", vec![1]));
        chat.playback().enqueue(PlaybackChunk::new(1, "two", vec![2]));
        assert!(chat.playback().is_playing());

        chat.clear();
        assert_eq!(mic.open_streams.load(Ordering::SeqCst), 0);
        assert!(!chat.vad().is_enabled());
        assert!(!chat.playback().is_playing());
        assert!(chat.playback().is_empty());
        assert_eq!(chat.session().mode(), Mode::Disabled);
        assert!(matches!(chat.start_recording(), Err(Error::Disabled)));
        assert!(matches!(chat.enable_hands_free(), Err(Error::Disabled)));

        chat.session().set_mode(Mode::Manual);
        chat.start_recording().unwrap();
        assert!(chat.is_recording());
    }
}
