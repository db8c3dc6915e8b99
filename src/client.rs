//! Protocol client
//!
//! Owns at most one WebSocket to the voice pipeline. Concurrent `connect`
//! calls share a single in-progress attempt, and every attempt carries an id so
//! that a late close from an old socket cannot tear down a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use base64::Engine;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::pipeline::PendingRequest;
use crate::playback::{PlaybackChunk, PlaybackQueue};
use crate::session::{ConnectionState, Session};
use crate::types::events::server::TtsChunkEvent;
use crate::types::{ClientEvent, ServerEvent};
use crate::{lock, Error, Result};

mod stats;

pub use stats::Stats;

pub type ClientTx = tokio::sync::mpsc::Sender<ClientEvent>;
type ServerTx = tokio::sync::broadcast::Sender<ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<ServerEvent>;

type ConnectFuture = Shared<BoxFuture<'static, std::result::Result<Connection, String>>>;

#[derive(Clone)]
struct Connection {
    id: u64,
    tx: ClientTx,
}

enum Link {
    Closed,
    Connecting(u64, ConnectFuture),
    Open(Connection),
}

struct Inner {
    url: String,
    capacity: usize,
    link: Mutex<Link>,
    next_id: AtomicU64,
    s_tx: ServerTx,
    session: Session,
    playback: PlaybackQueue,
    pending: PendingRequest,
    stats: Arc<Mutex<Stats>>,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: &Config, session: Session, playback: PlaybackQueue) -> Self {
        let (s_tx, _) = tokio::sync::broadcast::channel(config.capacity());
        let stats = Arc::new(Mutex::new(Stats::new()));
        Self {
            inner: Arc::new(Inner {
                url: config.url().to_string(),
                capacity: config.capacity(),
                link: Mutex::new(Link::Closed),
                next_id: AtomicU64::new(1),
                s_tx,
                pending: PendingRequest::new(session.clone(), stats.clone()),
                session,
                playback,
                stats,
            }),
        }
    }

    /// Opens the socket, or joins the attempt already in progress.
    ///
    /// Resolves immediately when the connection is already open.
    pub async fn connect(&self) -> Result<()> {
        let (id, attempt) = {
            let mut link = lock(&self.inner.link);
            match &*link {
                Link::Open(_) => return Ok(()),
                Link::Connecting(id, attempt) => (*id, attempt.clone()),
                Link::Closed => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
                    let attempt = open_socket(
                        self.inner.url.clone(),
                        self.inner.capacity,
                        Arc::downgrade(&self.inner),
                        id,
                    )
                    .boxed()
                    .shared();
                    *link = Link::Connecting(id, attempt.clone());
                    self.inner.session.set_connection_state(ConnectionState::Connecting);
                    (id, attempt)
                }
            }
        };

        let result = attempt.await;

        let mut link = lock(&self.inner.link);
        let current = matches!(&*link, Link::Connecting(current, _) if *current == id);
        match result {
            Ok(connection) => {
                if current {
                    *link = Link::Open(connection);
                    self.inner.session.set_connection_state(ConnectionState::Open);
                    tracing::info!("connected to {}", self.inner.url);
                    return Ok(());
                }
                match &*link {
                    Link::Open(open) if open.id == id => Ok(()),
                    _ => Err(Error::Connection("connection closed".to_string())),
                }
            }
            Err(reason) => {
                if current {
                    *link = Link::Closed;
                    self.inner.session.set_connection_state(ConnectionState::Disconnected);
                }
                tracing::error!("failed to connect to {}: {}", self.inner.url, reason);
                Err(Error::Connection(reason))
            }
        }
    }

    /// Closes the socket. An outstanding request fails with a connection error.
    pub fn disconnect(&self) {
        let id = match &*lock(&self.inner.link) {
            Link::Closed => return,
            Link::Connecting(id, _) => *id,
            Link::Open(connection) => connection.id,
        };
        self.inner.connection_lost(id, "disconnected");
    }

    pub fn is_open(&self) -> bool {
        matches!(&*lock(&self.inner.link), Link::Open(_))
    }

    pub fn server_events(&self) -> ServerRx {
        self.inner.s_tx.subscribe()
    }

    pub fn stats(&self) -> Stats {
        lock(&self.inner.stats).clone()
    }

    /// Sends a keep-alive; the server answers with `pong`.
    pub async fn ping(&self) -> Result<()> {
        self.send_client_event(ClientEvent::Ping).await
    }

    /// Routes one inbound event to the session, the playback queue and the
    /// pending request, then rebroadcasts it to `server_events` subscribers.
    pub fn dispatch(&self, event: ServerEvent) {
        self.inner.dispatch(event);
    }

    pub(crate) async fn send_client_event(&self, event: ClientEvent) -> Result<()> {
        let tx = match &*lock(&self.inner.link) {
            Link::Open(connection) => connection.tx.clone(),
            _ => return Err(Error::Connection("not connected yet".to_string())),
        };
        tx.send(event)
            .await
            .map_err(|_| Error::Connection("connection closed".to_string()))
    }

    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn pending(&self) -> &PendingRequest {
        &self.inner.pending
    }
}

impl Inner {
    fn connection_lost(&self, id: u64, reason: &str) {
        {
            let mut link = lock(&self.link);
            let current = match &*link {
                Link::Closed => false,
                Link::Connecting(current, _) => *current == id,
                Link::Open(connection) => connection.id == id,
            };
            if !current {
                return;
            }
            *link = Link::Closed;
        }
        tracing::info!("connection lost: {}", reason);
        self.session.set_connection_state(ConnectionState::Disconnected);
        self.pending.settle(Err(Error::Connection(reason.to_string())));
    }

    fn receive_text(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text).map_err(Error::from) {
            Ok(event) => {
                tracing::debug!("received message: {}", event.kind());
                self.dispatch(event);
            }
            Err(e) => {
                tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
            }
        }
    }

    fn dispatch(&self, event: ServerEvent) {
        match &event {
            ServerEvent::SttStart => self.session.begin_transcript(),
            ServerEvent::SttSegment(segment) => self.session.append_transcript(segment.content()),
            ServerEvent::SttDone(done) => self.session.finish_transcript(done.full_transcript()),
            ServerEvent::LlmStart => self.session.begin_response(),
            ServerEvent::LlmToken(token) => self.session.append_response(token.content()),
            ServerEvent::LlmDone(done) => self.session.finish_response(done.full_response()),
            ServerEvent::TtsStart => self.playback.reset(),
            ServerEvent::TtsChunk(chunk) => self.receive_chunk(chunk),
            ServerEvent::TtsDone(done) => {
                tracing::debug!("synthesis done, total_chunks={:?}", done.total_chunks());
            }
            ServerEvent::PipelineDone => {
                if !self.pending.settle(Ok(())) {
                    tracing::debug!("pipeline_done with no request pending");
                }
            }
            ServerEvent::ChatStart(_) => self.session.begin_response(),
            ServerEvent::ChatToken(token) => self.session.append_response(token.content()),
            ServerEvent::ChatDone(done) => {
                self.session.finish_response(done.full_response());
                if !self.pending.settle(Ok(())) {
                    tracing::debug!("done with no request pending");
                }
            }
            ServerEvent::Error(error) => {
                tracing::warn!("pipeline error: {}", error.message());
                let settled = self
                    .pending
                    .settle(Err(Error::RemotePipeline(error.message().to_string())));
                if !settled {
                    tracing::debug!("error event with no request pending");
                }
            }
            ServerEvent::Pong => tracing::trace!("pong"),
            ServerEvent::Unknown => tracing::debug!("ignoring unknown event"),
        }
        // No subscribers is fine.
        let _ = self.s_tx.send(event);
    }

    fn receive_chunk(&self, chunk: &TtsChunkEvent) {
        let audio = match base64::engine::general_purpose::STANDARD.decode(chunk.audio()) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!("skipping chunk {}: {}", chunk.index(), Error::Decode(e));
                return;
            }
        };
        lock(&self.stats).record_chunk();
        self.pending.note_chunk();
        self.playback
            .enqueue(PlaybackChunk::new(chunk.index(), chunk.sentence(), audio));
    }
}

async fn open_socket(
    url: String,
    capacity: usize,
    inner: Weak<Inner>,
    id: u64,
) -> std::result::Result<Connection, String> {
    tracing::debug!("opening socket #{} to {}", id, url);
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| e.to_string())?;

    let (mut write, mut read) = ws_stream.split();
    let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientEvent>(capacity);

    let writer = inner.clone();
    tokio::spawn(async move {
        while let Some(event) = c_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("failed to serialize event: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text)).await {
                tracing::error!("failed to send message: {}", e);
                if let Some(inner) = writer.upgrade() {
                    inner.connection_lost(id, &format!("send failed: {}", e));
                }
                break;
            }
        }
        if let Err(e) = write.close().await {
            tracing::debug!("close after send loop: {}", e);
        }
    });

    tokio::spawn(async move {
        while let Some(message) = read.next().await {
            let message = match message {
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    break;
                }
                Ok(message) => message,
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match message {
                Message::Text(text) => inner.receive_text(&text),
                Message::Binary(bin) => {
                    tracing::warn!("unexpected binary message: {} bytes", bin.len());
                }
                Message::Close(reason) => {
                    tracing::info!("connection closed: {:?}", reason);
                    break;
                }
                _ => {}
            }
        }
        if let Some(inner) = inner.upgrade() {
            inner.connection_lost(id, "connection closed");
        }
    });

    Ok(Connection { id, tx: c_tx })
}
