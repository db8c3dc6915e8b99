use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    completed: u32,
    failed: u32,
    chunks_received: u32,
    last_round_trip_ms: Option<u64>,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&mut self, round_trip: Duration) {
        self.completed += 1;
        self.last_round_trip_ms = Some(round_trip.as_millis() as u64);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub(crate) fn record_chunk(&mut self) {
        self.chunks_received += 1;
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn chunks_received(&self) -> u32 {
        self.chunks_received
    }

    pub fn last_round_trip(&self) -> Option<Duration> {
        self.last_round_trip_ms.map(Duration::from_millis)
    }
}
