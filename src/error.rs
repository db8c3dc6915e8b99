use crate::recorder::CaptureMode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The microphone could not be opened.
    #[error("microphone unavailable: {0}")]
    DeviceAcquisition(String),

    /// The connection could not be established or a send failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A chunk could not be rendered by the output device.
    #[error("playback failed: {0}")]
    Playback(String),

    /// The pipeline reported an `error` event for the current request.
    #[error("{0}")]
    RemotePipeline(String),

    /// A pipeline request is already in flight.
    #[error("a pipeline request is already in flight")]
    Busy,

    /// The session was cleared; voice input stays off until manual mode is restored.
    #[error("voice input is disabled")]
    Disabled,

    #[error("{active} capture is already running")]
    CaptureConflict { active: CaptureMode },

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("invalid audio payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
