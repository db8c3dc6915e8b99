use crate::audio::{Base64EncodedAudioBytes, DEFAULT_MODEL};

/// `audio` request: one captured utterance for the speech pipeline
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioEvent {
    /// The encoded utterance
    data: Base64EncodedAudioBytes,

    /// The language model that should answer, ex: "llama3.2:1b"
    model: String,
}

impl AudioEvent {
    pub fn new(data: Base64EncodedAudioBytes) -> Self {
        Self {
            data,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn data(&self) -> &Base64EncodedAudioBytes {
        &self.data
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// `chat` request: a typed prompt answered with `start`, `token` and `done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatEvent {
    prompt: String,
    model: String,
}

impl ChatEvent {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}
