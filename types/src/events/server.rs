use crate::audio::Base64EncodedAudioBytes;

/// `stt_segment` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SttSegmentEvent {
    /// Text of the segment
    content: String,

    /// Offset of the segment within the utterance, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<f64>,
}

impl SttSegmentEvent {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            start: None,
            end: None,
        }
    }

    pub fn with_timing(mut self, start: f64, end: f64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn start(&self) -> Option<f64> {
        self.start
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }
}

/// `stt_done` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SttDoneEvent {
    /// All segments joined
    #[serde(default)]
    full_transcript: String,
}

impl SttDoneEvent {
    pub fn new(full_transcript: &str) -> Self {
        Self {
            full_transcript: full_transcript.to_string(),
        }
    }

    pub fn full_transcript(&self) -> &str {
        &self.full_transcript
    }
}

/// `start` event: the chat reply is about to stream
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatStartEvent {
    /// The prompt being answered, echoed back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

impl ChatStartEvent {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: Some(prompt.to_string()),
        }
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }
}

/// `llm_token` and `token` events
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LlmTokenEvent {
    content: String,
}

impl LlmTokenEvent {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// `llm_done` and `done` events
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LlmDoneEvent {
    /// The complete generated response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    full_response: Option<String>,
}

impl LlmDoneEvent {
    pub fn new() -> Self {
        Self { full_response: None }
    }

    pub fn with_full_response(mut self, full_response: &str) -> Self {
        self.full_response = Some(full_response.to_string());
        self
    }

    pub fn full_response(&self) -> Option<&str> {
        self.full_response.as_deref()
    }
}

impl Default for LlmDoneEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// `tts_chunk` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TtsChunkEvent {
    /// Synthesized speech for one sentence (MP3)
    audio: Base64EncodedAudioBytes,

    /// Emission order within the response, starting at 0
    index: u32,

    /// The sentence that was synthesized
    #[serde(default)]
    sentence: String,
}

impl TtsChunkEvent {
    pub fn new(audio: Base64EncodedAudioBytes, index: u32, sentence: &str) -> Self {
        Self {
            audio,
            index,
            sentence: sentence.to_string(),
        }
    }

    pub fn audio(&self) -> &Base64EncodedAudioBytes {
        &self.audio
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }
}

/// `tts_done` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TtsDoneEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_chunks: Option<u32>,
}

impl TtsDoneEvent {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks: Some(total_chunks),
        }
    }

    pub fn total_chunks(&self) -> Option<u32> {
        self.total_chunks
    }
}

/// `error` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    message: String,
}

impl ErrorEvent {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
