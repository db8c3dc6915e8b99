pub mod client;
pub mod server;

use client::*;
use server::*;

/// Messages sent from the client to the voice pipeline.
///
/// `audio` is answered with a stream of [`ServerEvent`]s ending in
/// `pipeline_done` or `error`, and `chat` with one ending in `done` or `error`.
/// There is never more than one request outstanding, so events carry no
/// correlation id.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "audio")]
    Audio(AudioEvent),
    #[serde(rename = "chat")]
    Chat(ChatEvent),
    #[serde(rename = "ping")]
    Ping,
}

/// Streaming events pushed by the voice pipeline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "stt_start")]
    SttStart,
    #[serde(rename = "stt_segment")]
    SttSegment(SttSegmentEvent),
    #[serde(rename = "stt_done")]
    SttDone(SttDoneEvent),
    #[serde(rename = "llm_start")]
    LlmStart,
    #[serde(rename = "llm_token")]
    LlmToken(LlmTokenEvent),
    #[serde(rename = "llm_done")]
    LlmDone(LlmDoneEvent),
    #[serde(rename = "tts_start")]
    TtsStart,
    #[serde(rename = "tts_chunk")]
    TtsChunk(TtsChunkEvent),
    #[serde(rename = "tts_done")]
    TtsDone(TtsDoneEvent),
    #[serde(rename = "pipeline_done")]
    PipelineDone,
    #[serde(rename = "start")]
    ChatStart(ChatStartEvent),
    #[serde(rename = "token")]
    ChatToken(LlmTokenEvent),
    #[serde(rename = "done")]
    ChatDone(LlmDoneEvent),
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "pong")]
    Pong,
    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Whether this event concludes the request currently in flight.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerEvent::PipelineDone | ServerEvent::ChatDone(_) | ServerEvent::Error(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SttStart => "stt_start",
            ServerEvent::SttSegment(_) => "stt_segment",
            ServerEvent::SttDone(_) => "stt_done",
            ServerEvent::LlmStart => "llm_start",
            ServerEvent::LlmToken(_) => "llm_token",
            ServerEvent::LlmDone(_) => "llm_done",
            ServerEvent::TtsStart => "tts_start",
            ServerEvent::TtsChunk(_) => "tts_chunk",
            ServerEvent::TtsDone(_) => "tts_done",
            ServerEvent::PipelineDone => "pipeline_done",
            ServerEvent::ChatStart(_) => "start",
            ServerEvent::ChatToken(_) => "token",
            ServerEvent::ChatDone(_) => "done",
            ServerEvent::Error(_) => "error",
            ServerEvent::Pong => "pong",
            ServerEvent::Unknown => "unknown",
        }
    }
}
