//! Streaming playback queue
//!
//! Synthesized sentences arrive faster than they can be spoken. The queue
//! buffers them and a single worker task plays them one at a time, in arrival
//! order. `reset` cancels the worker's token, so a stale worker can never touch
//! the queue again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::device::Speaker;
use crate::lock;

/// One synthesized sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    sequence_index: u32,
    sentence: String,
    audio: Vec<u8>,
}

impl PlaybackChunk {
    pub fn new(sequence_index: u32, sentence: &str, audio: Vec<u8>) -> Self {
        Self {
            sequence_index,
            sentence: sentence.to_string(),
            audio,
        }
    }

    /// Emission index assigned by the server. Informational only: chunks play
    /// in arrival order.
    pub fn sequence_index(&self) -> u32 {
        self.sequence_index
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }

    pub fn audio(&self) -> &[u8] {
        &self.audio
    }
}

struct QueueState {
    chunks: VecDeque<PlaybackChunk>,
    playing: bool,
    attempts: u64,
    worker: CancellationToken,
}

struct Inner {
    speaker: Arc<dyn Speaker>,
    state: Mutex<QueueState>,
    playing: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

impl PlaybackQueue {
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                speaker,
                state: Mutex::new(QueueState {
                    chunks: VecDeque::new(),
                    playing: false,
                    attempts: 0,
                    worker: CancellationToken::new(),
                }),
                playing,
            }),
        }
    }

    /// Appends a chunk and starts playback if nothing is playing.
    pub fn enqueue(&self, chunk: PlaybackChunk) {
        let mut state = lock(&self.inner.state);
        tracing::debug!(
            "queued chunk {} ({} bytes): {:?}",
            chunk.sequence_index,
            chunk.audio.len(),
            chunk.sentence
        );
        state.chunks.push_back(chunk);
        if state.playing {
            return;
        }
        state.playing = true;
        self.inner.playing.send_replace(true);
        let token = state.worker.clone();
        drop(state);

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.play_queue(token).await });
    }

    /// Drops every pending chunk and halts the chunk being played.
    pub fn reset(&self) {
        let mut state = lock(&self.inner.state);
        let dropped = state.chunks.len();
        state.chunks.clear();
        state.worker.cancel();
        state.worker = CancellationToken::new();
        if state.playing {
            state.playing = false;
            self.inner.playing.send_replace(false);
        }
        if dropped > 0 {
            tracing::debug!("playback reset, {} chunks dropped", dropped);
        }
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.inner.state).playing
    }

    /// Chunks waiting behind the one being played.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of chunks handed to the speaker so far.
    pub fn attempts(&self) -> u64 {
        lock(&self.inner.state).attempts
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.playing.subscribe()
    }
}

impl Inner {
    async fn play_queue(&self, token: CancellationToken) {
        loop {
            let chunk = {
                let mut state = lock(&self.state);
                if token.is_cancelled() {
                    return;
                }
                match state.chunks.pop_front() {
                    Some(chunk) => {
                        state.attempts += 1;
                        chunk
                    }
                    None => {
                        state.playing = false;
                        self.playing.send_replace(false);
                        tracing::debug!("playback idle");
                        return;
                    }
                }
            };

            let index = chunk.sequence_index;
            let playback = self.speaker.play(chunk.audio);
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("chunk {} interrupted", index);
                    return;
                }
                result = playback => {
                    if let Err(e) = result {
                        tracing::warn!("chunk {} failed, skipping: {}", index, e);
                    }
                }
            }
        }
    }
}
