//! Analytic stage executors.
//!
//! One executor per engine operation. Executors are stateless: everything
//! they need comes from the [`StageDefinition`] and the [`FeatureStore`].
//! Each issues exactly one analytic engine call with the stage's parameter
//! bundle forwarded unmodified.

mod hotspot;
mod output;
mod prepare;
mod regression;

pub use hotspot::{HotspotExecutor, InterpolateExecutor};
pub use output::StageOutput;
pub use prepare::{AggregateExecutor, CopyExecutor, IntegrateExecutor};
pub use regression::{AutocorrelationExecutor, GwrExecutor, OlsExecutor};

use crate::core::Operation;
use crate::pipeline::{StageDefinition, StageParams};
use crate::store::{FeatureStore, StoreError};
use async_trait::async_trait;
use std::fmt::Debug;

/// Runs one stage against the store's engine.
///
/// Input existence and output verification belong to the runner; an
/// executor only performs the operation.
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// Returns the operation this executor performs.
    fn operation(&self) -> Operation;

    /// Executes the stage.
    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError>;
}

/// Returns the executor for a parameter bundle.
#[must_use]
pub fn executor_for(params: &StageParams) -> &'static dyn StageExecutor {
    match params {
        StageParams::Copy => &CopyExecutor,
        StageParams::Integrate(_) => &IntegrateExecutor,
        StageParams::AggregateToPoints(_) => &AggregateExecutor,
        StageParams::HotspotAnalysis(_) => &HotspotExecutor,
        StageParams::Interpolate(_) => &InterpolateExecutor,
        StageParams::OrdinaryLeastSquares(_) => &OlsExecutor,
        StageParams::SpatialAutocorrelation(_) => &AutocorrelationExecutor,
        StageParams::GeographicallyWeightedRegression(_) => &GwrExecutor,
    }
}

fn params_mismatch(stage: &StageDefinition, expected: Operation) -> StoreError {
    StoreError::InvalidDefinition(format!(
        "stage '{}' carries {} parameters, expected {expected}",
        stage.name,
        stage.operation()
    ))
}
