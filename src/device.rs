//! Device seams
//!
//! The engine never talks to audio hardware directly. Capture goes through
//! [`Microphone`] / [`InputStream`] and output through [`Speaker`], so the
//! cpal implementations in `native` can be swapped for scripted ones.

use std::fmt;

use futures::future::BoxFuture;

use crate::{Error, Result};

type Encoder = Box<dyn FnOnce() -> Result<Vec<u8>> + Send>;

/// Audio taken off an [`InputStream`] that still has to be encoded.
///
/// Encoding runs on the blocking pool, never on the thread that sampled the
/// device.
pub struct RawCapture {
    encoder: Encoder,
}

impl RawCapture {
    pub fn new<F>(encoder: F) -> Self
    where
        F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
    {
        Self {
            encoder: Box::new(encoder),
        }
    }

    /// Audio that is already in its final encoding.
    pub fn encoded(audio: Vec<u8>) -> Self {
        Self::new(move || Ok(audio))
    }

    pub async fn encode(self) -> Result<Vec<u8>> {
        tokio::task::spawn_blocking(self.encoder)
            .await
            .map_err(|e| Error::Capture(format!("encoder stopped: {}", e)))?
    }
}

impl fmt::Debug for RawCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCapture").finish_non_exhaustive()
    }
}

pub trait Microphone: Send + Sync {
    /// Opens the capture device.
    ///
    /// Either a fully working stream is returned or nothing stays allocated.
    fn open(&self) -> Result<Box<dyn InputStream>>;
}

/// An open capture device. Dropping it releases the device.
pub trait InputStream: Send {
    /// Current input energy on a 0-100 scale.
    fn level(&mut self) -> f32;

    /// Starts buffering audio.
    fn begin_capture(&mut self) -> Result<()>;

    /// Stops buffering and hands over everything captured since
    /// `begin_capture`. Must not do the encoding itself.
    fn end_capture(&mut self) -> Result<RawCapture>;
}

pub trait Speaker: Send + Sync {
    /// Renders one encoded chunk to completion.
    ///
    /// Dropping the returned future must stop the output.
    fn play(&self, audio: Vec<u8>) -> BoxFuture<'static, Result<()>>;
}
