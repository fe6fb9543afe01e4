//! Artifacts recorded by a pipeline run.

use super::DatasetKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Something a stage left behind: a catalog dataset or an engine report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    /// Name of the dataset or report.
    pub name: String,

    /// The artifact kind.
    pub kind: DatasetKind,

    /// The stage that produced it.
    pub stage: String,

    /// Structured payload (report statistics, raster summary); `null` for
    /// plain datasets.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Additional metadata about the artifact.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the artifact was recorded.
    pub created_at: DateTime<Utc>,
}

impl RunArtifact {
    /// Creates a new artifact record without a payload.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DatasetKind, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            stage: stage.into(),
            data: serde_json::Value::Null,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attaches a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Adds metadata to the artifact.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the artifact is a report rather than a dataset.
    #[must_use]
    pub fn is_report(&self) -> bool {
        !self.kind.is_persisted()
    }
}
