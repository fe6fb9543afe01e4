//! Feature store adapter.
//!
//! A thin, idempotent layer over the engine's catalog operations, bound to a
//! single workspace for its whole lifetime.

use crate::core::{DatasetRef, Workspace};
use crate::engine::{GeoEngine, RasterSurface};
use crate::errors::EngineError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from store operations and stage executors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A dataset the operation reads does not exist.
    #[error("dataset '{}' does not exist", .0.name)]
    NotFound(DatasetRef),

    /// The engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A stage definition does not fit its executor.
    #[error("invalid stage definition: {0}")]
    InvalidDefinition(String),
}

/// Named-dataset catalog access scoped to one workspace.
#[derive(Clone)]
pub struct FeatureStore {
    engine: Arc<dyn GeoEngine>,
    workspace: Workspace,
}

impl fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureStore")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl FeatureStore {
    /// Binds an engine to a workspace.
    #[must_use]
    pub fn new(engine: Arc<dyn GeoEngine>, workspace: Workspace) -> Self {
        Self { engine, workspace }
    }

    /// Returns the workspace this store writes to.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &dyn GeoEngine {
        self.engine.as_ref()
    }

    /// Returns whether `dataset` exists. Unknown datasets are `Ok(false)`.
    pub async fn exists(&self, dataset: &DatasetRef) -> Result<bool, EngineError> {
        self.engine.exists(&self.workspace, dataset).await
    }

    /// Returns the first dataset of `datasets` that does not exist.
    pub async fn first_missing<'a>(
        &self,
        datasets: impl IntoIterator<Item = &'a DatasetRef>,
    ) -> Result<Option<&'a DatasetRef>, EngineError> {
        for dataset in datasets {
            if !self.exists(dataset).await? {
                return Ok(Some(dataset));
            }
        }
        Ok(None)
    }

    /// Removes `dataset` if present.
    ///
    /// Returns whether something was removed; deleting an absent dataset is
    /// a no-op, not an error.
    pub async fn delete(&self, dataset: &DatasetRef) -> Result<bool, EngineError> {
        if !self.exists(dataset).await? {
            debug!(dataset = %dataset.name, "Delete skipped, dataset absent");
            return Ok(false);
        }
        self.engine.delete(&self.workspace, dataset).await?;
        debug!(dataset = %dataset.name, "Deleted dataset");
        Ok(true)
    }

    /// Copies `source` to `dest`, replacing any existing `dest`.
    pub async fn copy(&self, source: &DatasetRef, dest: &DatasetRef) -> Result<(), StoreError> {
        if !self.exists(source).await? {
            return Err(StoreError::NotFound(source.clone()));
        }
        self.delete(dest).await?;
        self.engine.copy(&self.workspace, source, dest).await?;
        debug!(source = %source.name, dest = %dest.name, "Copied dataset");
        Ok(())
    }

    /// Persists an interpolated surface under `dest`, replacing any existing `dest`.
    pub async fn save_raster(&self, raster: &RasterSurface, dest: &DatasetRef) -> Result<(), StoreError> {
        self.delete(dest).await?;
        self.engine.save_raster(&self.workspace, raster, dest).await?;
        debug!(dest = %dest.name, handle = %raster.handle, "Saved raster");
        Ok(())
    }
}
