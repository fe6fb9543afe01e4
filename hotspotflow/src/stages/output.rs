//! Stage output type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an executor hands back to the runner on success.
///
/// `data` is keyed by output name and carries in-memory payloads (the
/// autocorrelation report, a raster handle). Persisted datasets need no
/// payload: the runner checks them in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Payloads keyed by output name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageOutput {
    /// Creates an output with no payloads.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::default()
    }

    /// Creates an output with a single payload.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut data = HashMap::new();
        data.insert(key.into(), value);
        Self {
            data,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Gets a payload.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}
