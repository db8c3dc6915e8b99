mod client;
pub mod config;
pub mod device;
mod error;
pub mod pipeline;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod vad;
mod voice_chat;

#[cfg(feature = "utils")]
pub mod native;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use voice_chat_types as types;
pub use client::{Client, ClientTx, ServerRx, Stats};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineOutcome, UtteranceSink};
pub use playback::{PlaybackChunk, PlaybackQueue};
pub use recorder::{CaptureMode, CapturedUtterance, FinishedCapture};
pub use session::{ConnectionState, Mode, Session};
pub use vad::{VadConfig, VadEngine};
pub use voice_chat::VoiceChat;

#[cfg(feature = "utils")]
pub use voice_chat_utils as utils;

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
