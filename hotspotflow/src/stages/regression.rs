//! Regression stages over the covariate table.

use super::{params_mismatch, StageExecutor, StageOutput};
use crate::core::Operation;
use crate::engine::OlsOutputs;
use crate::errors::EngineError;
use crate::pipeline::{StageDefinition, StageParams};
use crate::store::{FeatureStore, StoreError};
use async_trait::async_trait;
use tracing::info;

/// Significance level used to flag clustered residuals.
const CLUSTER_ALPHA: f64 = 0.05;

/// Fits the global regression; writes features plus two side tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct OlsExecutor;

#[async_trait]
impl StageExecutor for OlsExecutor {
    fn operation(&self) -> Operation {
        Operation::OrdinaryLeastSquares
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::OrdinaryLeastSquares(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        let outputs = OlsOutputs {
            features: stage.output(0)?.clone(),
            coefficients: stage.output(1)?.clone(),
            diagnostics: stage.output(2)?.clone(),
        };
        store
            .engine()
            .ordinary_least_squares(store.workspace(), stage.input(0)?, &outputs, params)
            .await?;
        Ok(StageOutput::ok_empty())
    }
}

/// Tests the regression residuals for spatial clustering.
///
/// The result is a report, not a dataset; it travels in the stage output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutocorrelationExecutor;

#[async_trait]
impl StageExecutor for AutocorrelationExecutor {
    fn operation(&self) -> Operation {
        Operation::SpatialAutocorrelation
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::SpatialAutocorrelation(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        let output = stage.output(0)?;
        let report = store
            .engine()
            .spatial_autocorrelation(store.workspace(), stage.input(0)?, params)
            .await?;

        let clustered = report.is_clustered(CLUSTER_ALPHA);
        info!(
            morans_index = report.morans_index,
            z_score = report.z_score,
            p_value = report.p_value,
            clustered,
            "Residual autocorrelation"
        );

        let payload = serde_json::to_value(&report).map_err(EngineError::from)?;
        Ok(StageOutput::ok_value(output.name.clone(), payload)
            .add_metadata("clustered", serde_json::json!(clustered)))
    }
}

/// Fits the geographically weighted regression.
#[derive(Debug, Clone, Copy, Default)]
pub struct GwrExecutor;

#[async_trait]
impl StageExecutor for GwrExecutor {
    fn operation(&self) -> Operation {
        Operation::GeographicallyWeightedRegression
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::GeographicallyWeightedRegression(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        store
            .engine()
            .geographically_weighted_regression(store.workspace(), stage.input(0)?, stage.output(0)?, params)
            .await?;
        Ok(StageOutput::ok_empty())
    }
}
