/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Model used by the remote pipeline when the request does not name one.
pub const DEFAULT_MODEL: &str = "llama3.2:1b";
