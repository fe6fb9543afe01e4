//! Event sink trait and implementations.

use super::{RunEvent, RunEventKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

/// Receives the runner's transition events.
///
/// `emit` must not fail the run: a sink that cannot deliver logs and drops.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    async fn emit(&self, event: RunEvent);
}

/// Discards every event. The runner's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: RunEvent) {}
}

/// Writes events to `tracing`.
///
/// Failure events always go to `warn`; the rest use the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging non-failure events at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: RunEvent) {
        let stage = event.stage.as_deref().unwrap_or("-");
        if event.kind.is_failure() {
            warn!(event = %event.kind, run_id = %event.run_id, stage, data = %event.data, "Run event");
        } else if self.level == Level::DEBUG {
            debug!(event = %event.kind, run_id = %event.run_id, stage, data = %event.data, "Run event");
        } else {
            info!(event = %event.kind, run_id = %event.run_id, stage, data = %event.data, "Run event");
        }
    }
}

/// Keeps every event in memory, for tests and for callers that want the
/// transition log after a run.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the event kinds, in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<RunEventKind> {
        self.events.read().iter().map(|e| e.kind).collect()
    }

    /// Returns the events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: RunEventKind) -> Vec<RunEvent> {
        self.events.read().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    /// Returns the events attributed to `stage`.
    #[must_use]
    pub fn for_stage(&self, stage: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage.as_deref() == Some(stage))
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops everything collected so far.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: RunEvent) {
        self.events.write().push(event);
    }
}
