//! Run events and the sinks that receive them.
//!
//! The runner emits one event per state transition. Sinks are passed to the
//! runner explicitly; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunEventKind {
    /// A run started; emitted before cleanup.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// Every cleanup target was deleted and verified absent.
    #[serde(rename = "cleanup.completed")]
    CleanupCompleted,
    /// A stage moved to `Running`.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage moved to `Succeeded`.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage moved to `Failed`.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// Every stage succeeded.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// The run halted.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
}

impl RunEventKind {
    /// Dotted event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::CleanupCompleted => "cleanup.completed",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageFailed => "stage.failed",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
        }
    }

    /// Returns true for the two failure kinds.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::StageFailed | Self::PipelineFailed)
    }
}

impl fmt::Display for RunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transition of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// What happened.
    pub kind: RunEventKind,
    /// Run the event belongs to.
    pub run_id: Uuid,
    /// Stage, for stage events and stage-attributed failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Engine operation of `stage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Kind-specific details.
    #[serde(default)]
    pub data: serde_json::Value,
    /// When it was emitted.
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Creates a run-level event with no details.
    #[must_use]
    pub fn new(kind: RunEventKind, run_id: Uuid) -> Self {
        Self {
            kind,
            run_id,
            stage: None,
            operation: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attributes the event to a stage.
    #[must_use]
    pub fn for_stage(mut self, stage: impl Into<String>, operation: Operation) -> Self {
        self.stage = Some(stage.into());
        self.operation = Some(operation);
        self
    }

    /// Attaches details.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
