//! Contract of the external geospatial analytics engine.
//!
//! The statistics themselves (hotspot z-scores, interpolation, regression
//! solvers) live in the engine. This crate only sequences calls against it.
//! Every call is scoped to an explicit [`Workspace`].

mod command;

pub use command::CommandEngine;

use crate::core::{DatasetRef, Workspace};
use crate::errors::EngineError;
use crate::params::{
    AutocorrelationParams, GwrParams, HotspotParams, IntegrateParams, InterpolateParams, OlsParams,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the engine reports after aggregating coincident events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOutcome {
    /// Name of the count field added to the output.
    pub count_field: String,
}

/// An interpolated surface held by the engine until it is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterSurface {
    /// Engine-side handle of the in-memory raster.
    pub handle: String,
    /// Dataset it was interpolated from.
    pub source: String,
    /// Field that was interpolated.
    pub value_field: String,
}

/// Output datasets of the global regression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlsOutputs {
    /// Features with residual fields.
    pub features: DatasetRef,
    /// Coefficient side table.
    pub coefficients: DatasetRef,
    /// Diagnostic side table.
    pub diagnostics: DatasetRef,
}

/// Global Moran's I statistics on regression residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocorrelationReport {
    /// Moran's index.
    pub morans_index: f64,
    /// Expected index under spatial randomness.
    pub expected_index: f64,
    /// Variance of the index.
    pub variance: f64,
    /// z-score of the observed index.
    pub z_score: f64,
    /// p-value of the observed index.
    pub p_value: f64,
    /// Report file written by the engine, if one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<String>,
}

impl AutocorrelationReport {
    /// Returns true if residuals cluster at the given significance level.
    #[must_use]
    pub fn is_clustered(&self, alpha: f64) -> bool {
        self.p_value < alpha && self.z_score > 0.0
    }
}

/// Operations the pipeline needs from a geospatial analytics engine.
///
/// `exists` must answer `Ok(false)` for an unknown dataset rather than fail.
/// Analytic calls are blocking from the pipeline's point of view: the runner
/// awaits each one to completion before issuing the next.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoEngine: Send + Sync {
    /// Returns whether a dataset exists in the workspace.
    async fn exists(&self, workspace: &Workspace, dataset: &DatasetRef) -> Result<bool, EngineError>;

    /// Removes a dataset.
    async fn delete(&self, workspace: &Workspace, dataset: &DatasetRef) -> Result<(), EngineError>;

    /// Copies `source` to `dest`.
    async fn copy(
        &self,
        workspace: &Workspace,
        source: &DatasetRef,
        dest: &DatasetRef,
    ) -> Result<(), EngineError>;

    /// Snaps features of `dataset` together in place.
    async fn integrate(
        &self,
        workspace: &Workspace,
        dataset: &DatasetRef,
        params: &IntegrateParams,
    ) -> Result<(), EngineError>;

    /// Collapses coincident points of `input` into weighted points in `output`.
    async fn aggregate_to_points(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
    ) -> Result<AggregateOutcome, EngineError>;

    /// Classifies hot and cold spots of `input` into `output`.
    async fn hotspot_analysis(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
        params: &HotspotParams,
    ) -> Result<(), EngineError>;

    /// Interpolates a surface from a point field.
    async fn interpolate(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        params: &InterpolateParams,
    ) -> Result<RasterSurface, EngineError>;

    /// Persists an interpolated surface under `dest`.
    async fn save_raster(
        &self,
        workspace: &Workspace,
        raster: &RasterSurface,
        dest: &DatasetRef,
    ) -> Result<(), EngineError>;

    /// Fits a global regression.
    async fn ordinary_least_squares(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        outputs: &OlsOutputs,
        params: &OlsParams,
    ) -> Result<(), EngineError>;

    /// Tests a field for spatial autocorrelation.
    async fn spatial_autocorrelation(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        params: &AutocorrelationParams,
    ) -> Result<AutocorrelationReport, EngineError>;

    /// Fits a geographically weighted regression.
    async fn geographically_weighted_regression(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
        params: &GwrParams,
    ) -> Result<(), EngineError>;
}
