//! Process-wide session state
//!
//! [`Session`] is a cheap handle around one [`SessionState`]. Every mutation
//! goes through a method here so the invariants hold in one place, and every
//! change is published to subscribers (the UI layer) through a watch channel.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Push-to-talk: the user starts and stops each recording.
    #[default]
    Manual,
    /// Recordings are started and stopped by voice activity detection.
    HandsFree,
    /// Voice input is off; entered when the session is cleared.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

/// Text shown to the user for the current turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Display {
    pub transcript: String,
    pub transcript_streaming: bool,
    pub response: String,
    pub response_streaming: bool,
    /// Set when the last turn failed.
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    mode: Mode,
    connection: ConnectionState,
    pipeline_in_flight: bool,
    record_enabled: bool,
    display: Display,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: Mode::Manual,
            connection: ConnectionState::Disconnected,
            pipeline_in_flight: false,
            record_enabled: true,
            display: Display::default(),
        }
    }
}

impl SessionState {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn pipeline_in_flight(&self) -> bool {
        self.pipeline_in_flight
    }

    /// Whether the manual record control accepts input.
    pub fn record_enabled(&self) -> bool {
        self.record_enabled
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    fn refresh_record_enabled(&mut self) {
        self.record_enabled = self.mode == Mode::Manual && !self.pipeline_in_flight;
    }
}

#[derive(Clone)]
pub struct Session {
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self { state: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn mode(&self) -> Mode {
        self.state.borrow().mode
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().connection
    }

    pub fn pipeline_in_flight(&self) -> bool {
        self.state.borrow().pipeline_in_flight
    }

    pub fn set_mode(&self, mode: Mode) {
        self.state.send_if_modified(|s| {
            if s.mode == mode {
                return false;
            }
            tracing::info!("mode: {:?} -> {:?}", s.mode, mode);
            s.mode = mode;
            s.refresh_record_enabled();
            true
        });
    }

    pub(crate) fn set_connection_state(&self, connection: ConnectionState) {
        self.state.send_if_modified(|s| {
            let changed = s.connection != connection;
            s.connection = connection;
            changed
        });
    }

    pub(crate) fn begin_pipeline(&self) {
        self.state.send_modify(|s| {
            s.pipeline_in_flight = true;
            s.display.status = None;
            s.refresh_record_enabled();
        });
    }

    /// Returns the session to idle after a terminal outcome.
    ///
    /// A failure replaces the response text with the status message.
    pub(crate) fn finish_pipeline(&self, failure: Option<&str>) {
        self.state.send_modify(|s| {
            s.pipeline_in_flight = false;
            s.display.transcript_streaming = false;
            s.display.response_streaming = false;
            if let Some(message) = failure {
                s.display.response = format!("Error: {}", message);
                s.display.status = Some(message.to_string());
            }
            s.refresh_record_enabled();
        });
    }

    pub(crate) fn begin_transcript(&self) {
        self.state.send_modify(|s| {
            s.display.transcript.clear();
            s.display.transcript_streaming = true;
        });
    }

    pub(crate) fn append_transcript(&self, segment: &str) {
        self.state.send_modify(|s| {
            if !s.display.transcript.is_empty() {
                s.display.transcript.push(' ');
            }
            s.display.transcript.push_str(segment);
        });
    }

    pub(crate) fn finish_transcript(&self, full_transcript: &str) {
        self.state.send_modify(|s| {
            if !full_transcript.is_empty() {
                s.display.transcript = full_transcript.to_string();
            }
            s.display.transcript_streaming = false;
        });
    }

    pub(crate) fn begin_response(&self) {
        self.state.send_modify(|s| {
            s.display.response.clear();
            s.display.response_streaming = true;
        });
    }

    pub(crate) fn append_response(&self, token: &str) {
        self.state.send_modify(|s| s.display.response.push_str(token));
    }

    pub(crate) fn finish_response(&self, full_response: Option<&str>) {
        self.state.send_modify(|s| {
            if let Some(full) = full_response {
                s.display.response = full.to_string();
            }
            s.display.response_streaming = false;
        });
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_in_manual_mode() {
        let session = Session::new();
        let state = session.snapshot();
        assert_eq!(state.mode(), Mode::Manual);
        assert_eq!(state.connection(), ConnectionState::Disconnected);
        assert!(!state.pipeline_in_flight());
        assert!(state.record_enabled());
    }

    #[test]
    fn record_control_follows_mode_and_flight() {
        let session = Session::new();
        session.begin_pipeline();
        assert!(!session.snapshot().record_enabled());
        session.finish_pipeline(None);
        assert!(session.snapshot().record_enabled());

        session.set_mode(Mode::HandsFree);
        session.begin_pipeline();
        session.finish_pipeline(Some("boom"));
        assert!(!session.snapshot().record_enabled());
        assert!(!session.pipeline_in_flight());
    }

    #[test]
    fn failure_replaces_response_text() {
        let session = Session::new();
        session.begin_pipeline();
        session.begin_response();
        session.append_response("Hel");
        session.finish_pipeline(Some("No speech detected"));
        let display = session.snapshot().display().clone();
        assert_eq!(display.response, "Error: No speech detected");
        assert_eq!(display.status.as_deref(), Some("No speech detected"));
        assert!(!display.response_streaming);
    }

    #[test]
    fn transcript_segments_are_space_joined() {
        let session = Session::new();
        session.begin_transcript();
        session.append_transcript("Hello");
        session.append_transcript("world.");
        assert_eq!(session.snapshot().display().transcript, "Hello world.");
        assert!(session.snapshot().display().transcript_streaming);
        session.finish_transcript("Hello world.");
        assert!(!session.snapshot().display().transcript_streaming);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let session = Session::new();
        let mut rx = session.subscribe();
        session.set_mode(Mode::HandsFree);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().mode(), Mode::HandsFree);
    }
}
