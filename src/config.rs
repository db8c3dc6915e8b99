//! Client configuration
//!
//! Settings come from the environment (a `.env` file is honoured) or from
//! [`ConfigBuilder`]. The endpoint, the model catalogue and the detection
//! thresholds are all external configuration; nothing here is protocol.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::vad::VadConfig;
use voice_chat_types::audio::DEFAULT_MODEL;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws/voice";
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Model {0} is not in the model catalogue")]
    UnknownModel(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    url: String,
    model: String,
    models: Vec<String>,
    vad: VadConfig,
    capacity: usize,
    log_level: Level,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.config.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.config.vad = vad;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validated()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            models: vec![DEFAULT_MODEL.to_string()],
            vad: VadConfig::default(),
            capacity: DEFAULT_CAPACITY,
            log_level: Level::INFO,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Starts a builder from these settings, e.g. to apply command-line overrides.
    pub fn into_builder(self) -> ConfigBuilder {
        ConfigBuilder { config: self }
    }

    /// Loads configuration from environment variables.
    ///
    /// *   `VOICE_CHAT_URL`: WebSocket endpoint of the voice pipeline.
    /// *   `VOICE_CHAT_MODEL`: Model sent with each request. Defaults to "llama3.2:1b".
    /// *   `VOICE_CHAT_MODELS`: Comma-separated model catalogue.
    /// *   `VAD_VOLUME_THRESHOLD`, `VAD_SILENCE_TIMEOUT_MS`, `VAD_MIN_SPEECH_MS`,
    ///     `VAD_MIN_UTTERANCE_BYTES`, `VAD_SAMPLE_INTERVAL_MS`: detection policy.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = VadConfig::default();
        let vad = VadConfig {
            volume_threshold: parse_var("VAD_VOLUME_THRESHOLD", defaults.volume_threshold)?,
            silence_timeout: Duration::from_millis(parse_var(
                "VAD_SILENCE_TIMEOUT_MS",
                defaults.silence_timeout.as_millis() as u64,
            )?),
            min_speech_duration: Duration::from_millis(parse_var(
                "VAD_MIN_SPEECH_MS",
                defaults.min_speech_duration.as_millis() as u64,
            )?),
            min_utterance_bytes: parse_var("VAD_MIN_UTTERANCE_BYTES", defaults.min_utterance_bytes)?,
            sample_interval: Duration::from_millis(parse_var(
                "VAD_SAMPLE_INTERVAL_MS",
                defaults.sample_interval.as_millis() as u64,
            )?),
        };
        if !(0.0..=100.0).contains(&vad.volume_threshold) {
            return Err(ConfigError::InvalidValue(
                "VAD_VOLUME_THRESHOLD".to_string(),
                format!("{} is outside 0-100", vad.volume_threshold),
            ));
        }
        if vad.sample_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "VAD_SAMPLE_INTERVAL_MS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let models = env::var("VOICE_CHAT_MODELS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|_| Vec::new());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().unwrap_or(Level::INFO);

        Self {
            url: env::var("VOICE_CHAT_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()),
            model: env::var("VOICE_CHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            models,
            vad,
            capacity: parse_var("VOICE_CHAT_CAPACITY", DEFAULT_CAPACITY)?.max(1),
            log_level,
        }
        .validated()
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        if self.models.is_empty() {
            self.models.push(self.model.clone());
        }
        if !self.models.contains(&self.model) {
            return Err(ConfigError::UnknownModel(self.model));
        }
        Ok(self)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn vad(&self) -> &VadConfig {
        &self.vad
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn log_level(&self) -> Level {
        self.log_level
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
