//! Pipeline coordinator
//!
//! Bridges a finished capture, or a typed prompt, to one round trip over the
//! [`Client`]. Only one request may be outstanding: the slot in
//! [`PendingRequest`] is claimed before anything is sent and settled exactly
//! once. A terminal event, a transport failure or a send failure settles it,
//! and so does dropping the round trip before the request reached the socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::client::{Client, Stats};
use crate::recorder::CapturedUtterance;
use crate::session::Session;
use crate::types::events::client::{AudioEvent, ChatEvent};
use crate::types::ClientEvent;
use crate::{lock, Error, Result};

/// Result of a completed round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    transcript: String,
    response: String,
    chunks: u32,
    round_trip: Duration,
}

impl PipelineOutcome {
    pub(crate) fn new(transcript: &str, response: &str, chunks: u32, round_trip: Duration) -> Self {
        Self {
            transcript: transcript.to_string(),
            response: response.to_string(),
            chunks,
            round_trip,
        }
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// Synthesized chunks received for this request.
    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    /// Time from sending the request to the terminal event.
    pub fn round_trip(&self) -> Duration {
        self.round_trip
    }
}

/// Receives finished utterances. Implemented by [`Pipeline`].
pub trait UtteranceSink: Send + Sync {
    /// Claims the request slot synchronously, then performs the round trip in
    /// the returned future.
    fn submit(&self, utterance: CapturedUtterance) -> BoxFuture<'static, Result<PipelineOutcome>>;
}

struct InFlight {
    tx: oneshot::Sender<Result<PipelineOutcome>>,
    started_at: Instant,
    chunks: u32,
}

/// The single outstanding request, if any.
#[derive(Clone)]
pub(crate) struct PendingRequest {
    slot: Arc<Mutex<Option<InFlight>>>,
    session: Session,
    stats: Arc<Mutex<Stats>>,
}

impl PendingRequest {
    pub(crate) fn new(session: Session, stats: Arc<Mutex<Stats>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            session,
            stats,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub(crate) fn claim(&self) -> Result<oneshot::Receiver<Result<PipelineOutcome>>> {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            return Err(Error::Busy);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(InFlight {
            tx,
            started_at: Instant::now(),
            chunks: 0,
        });
        self.session.begin_pipeline();
        Ok(rx)
    }

    fn start_clock(&self) {
        if let Some(in_flight) = lock(&self.slot).as_mut() {
            in_flight.started_at = Instant::now();
        }
    }

    pub(crate) fn note_chunk(&self) {
        if let Some(in_flight) = lock(&self.slot).as_mut() {
            in_flight.chunks += 1;
        }
    }

    /// Completes the outstanding request. Returns `false` if there was none.
    pub(crate) fn settle(&self, result: Result<()>) -> bool {
        let Some(in_flight) = lock(&self.slot).take() else {
            return false;
        };
        let round_trip = in_flight.started_at.elapsed();
        let failure = result.as_ref().err().map(|e| e.to_string());
        self.session.finish_pipeline(failure.as_deref());

        {
            let mut stats = lock(&self.stats);
            match &failure {
                None => stats.record_success(round_trip),
                Some(_) => stats.record_failure(),
            }
        }

        let outcome = result.map(|()| {
            let snapshot = self.session.snapshot();
            let display = snapshot.display();
            PipelineOutcome::new(&display.transcript, &display.response, in_flight.chunks, round_trip)
        });
        match &outcome {
            Ok(_) => tracing::info!("pipeline done in {}ms", round_trip.as_millis()),
            Err(e) => tracing::warn!("pipeline failed after {}ms: {}", round_trip.as_millis(), e),
        }
        if in_flight.tx.send(outcome).is_err() {
            tracing::debug!("pipeline result dropped, caller is gone");
        }
        true
    }
}

/// Fails the claimed request when dropped while still armed.
///
/// Armed from the claim until the request has been handed to the socket; after
/// that only a terminal event or the transport can settle it.
struct Unsent {
    pending: Option<PendingRequest>,
}

impl Unsent {
    fn armed(pending: PendingRequest) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    fn disarm(mut self) -> Option<PendingRequest> {
        self.pending.take()
    }
}

impl Drop for Unsent {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!("round trip dropped before the request was sent");
            pending.settle(Err(Error::Connection("request abandoned".to_string())));
        }
    }
}

enum Request {
    Utterance(CapturedUtterance),
    Text(String),
}

#[derive(Clone)]
pub struct Pipeline {
    client: Client,
    model: Arc<Mutex<String>>,
}

impl Pipeline {
    pub fn new(client: Client, model: &str) -> Self {
        Self {
            client,
            model: Arc::new(Mutex::new(model.to_string())),
        }
    }

    pub fn model(&self) -> String {
        lock(&self.model).clone()
    }

    pub fn set_model(&self, model: &str) {
        *lock(&self.model) = model.to_string();
    }

    pub fn is_busy(&self) -> bool {
        self.client.pending().is_pending()
    }

    /// Sends one utterance and waits for its terminal event.
    ///
    /// Fails with [`Error::Busy`] if another request is outstanding.
    pub async fn run(&self, utterance: CapturedUtterance) -> Result<PipelineOutcome> {
        self.submit(utterance).await
    }

    /// Sends a typed prompt and waits for the streamed reply.
    ///
    /// Shares the request slot with [`run`](Self::run). The prompt becomes the
    /// transcript and the reply streams into the response.
    pub async fn send_text(&self, prompt: &str) -> Result<PipelineOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        self.round_trip(Request::Text(prompt.to_string())).await
    }

    fn round_trip(&self, request: Request) -> BoxFuture<'static, Result<PipelineOutcome>> {
        let pending = self.client.pending().clone();
        let claimed = pending.claim().map(|rx| (rx, Unsent::armed(pending)));
        let this = self.clone();
        async move {
            let (rx, unsent) = claimed?;
            let sent = this.send(request).await;
            if let (Err(e), Some(pending)) = (sent, unsent.disarm()) {
                pending.settle(Err(e));
            }
            rx.await
                .unwrap_or_else(|_| Err(Error::Connection("request abandoned".to_string())))
        }
        .boxed()
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.client.connect().await?;
        self.client.pending().start_clock();

        let model = self.model();
        let event = match request {
            Request::Utterance(utterance) => {
                let data = base64::engine::general_purpose::STANDARD.encode(utterance.audio());
                tracing::info!(
                    "sending {} bytes ({}ms of {} audio) to {}",
                    utterance.len(),
                    utterance.duration().as_millis(),
                    utterance.mode(),
                    model
                );
                ClientEvent::Audio(AudioEvent::new(data).with_model(&model))
            }
            Request::Text(prompt) => {
                tracing::info!("sending {} character prompt to {}", prompt.len(), model);
                self.client.session().finish_transcript(&prompt);
                ClientEvent::Chat(ChatEvent::new(&prompt).with_model(&model))
            }
        };
        self.client.send_client_event(event).await
    }
}

impl UtteranceSink for Pipeline {
    fn submit(&self, utterance: CapturedUtterance) -> BoxFuture<'static, Result<PipelineOutcome>> {
        self.round_trip(Request::Utterance(utterance))
    }
}
