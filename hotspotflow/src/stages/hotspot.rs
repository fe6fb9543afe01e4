//! Hotspot classification and its visualization surface.

use super::{params_mismatch, StageExecutor, StageOutput};
use crate::core::Operation;
use crate::errors::EngineError;
use crate::pipeline::{StageDefinition, StageParams};
use crate::store::{FeatureStore, StoreError};
use async_trait::async_trait;

/// Classifies hot and cold spots of the aggregated counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotspotExecutor;

#[async_trait]
impl StageExecutor for HotspotExecutor {
    fn operation(&self) -> Operation {
        Operation::HotspotAnalysis
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::HotspotAnalysis(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        store
            .engine()
            .hotspot_analysis(store.workspace(), stage.input(0)?, stage.output(0)?, params)
            .await?;
        Ok(StageOutput::ok_empty())
    }
}

/// Interpolates the hotspot z-scores into a raster and saves it.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolateExecutor;

#[async_trait]
impl StageExecutor for InterpolateExecutor {
    fn operation(&self) -> Operation {
        Operation::Interpolate
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::Interpolate(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        let output = stage.output(0)?;
        let surface = store
            .engine()
            .interpolate(store.workspace(), stage.input(0)?, params)
            .await?;
        store.save_raster(&surface, output).await?;

        let payload = serde_json::to_value(&surface).map_err(EngineError::from)?;
        Ok(StageOutput::ok_value(output.name.clone(), payload))
    }
}
