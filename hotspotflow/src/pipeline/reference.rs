//! The reference incident hotspot pipeline.

use super::registry::{StageDefinition, StageParams, StageRegistry};
use crate::config::PipelineConfig;
use crate::core::DatasetKind;
use crate::errors::RegistryValidationError;

impl StageRegistry {
    /// Builds the eight-stage reference pipeline from configuration.
    ///
    /// The hotspot branch (`clean_copy` through `interpolate`) runs first,
    /// then the regression branch (`ols` through `gwr`) over the covariates.
    pub fn reference(config: &PipelineConfig) -> Result<Self, RegistryValidationError> {
        let names = &config.datasets;
        let stages = &config.stages;

        let incidents = names.incidents();
        let covariates = names.covariates();
        let working = config.transient(&names.working, DatasetKind::PointFeatures);
        let counts = config.transient(&names.counts, DatasetKind::PointFeatures);
        let hotspots = config.transient(&names.hotspots, DatasetKind::Features);
        let surface = config.transient(&names.surface, DatasetKind::Raster);
        let ols_features = config.transient(&names.ols_features, DatasetKind::Features);
        let report = config.transient(&names.autocorrelation_report, DatasetKind::Report);

        Self::builder(&config.name)
            .source(incidents.clone())
            .source(covariates.clone())
            .stage(
                StageDefinition::new("clean_copy", StageParams::Copy)
                    .with_input(incidents)
                    .with_output(working.clone()),
            )
            .stage(
                StageDefinition::new("integrate", StageParams::Integrate(stages.integrate.clone()))
                    .with_input(working.clone())
                    .with_output(working.clone()),
            )
            .stage(
                StageDefinition::new(
                    "collect_events",
                    StageParams::AggregateToPoints(stages.collect_events.clone()),
                )
                .with_input(working)
                .with_output(counts.clone()),
            )
            .stage(
                StageDefinition::new("hotspot", StageParams::HotspotAnalysis(stages.hotspot.clone()))
                    .with_input(counts)
                    .with_output(hotspots.clone()),
            )
            .stage(
                StageDefinition::new("interpolate", StageParams::Interpolate(stages.interpolate.clone()))
                    .with_input(hotspots)
                    .with_output(surface),
            )
            .stage(
                StageDefinition::new("ols", StageParams::OrdinaryLeastSquares(stages.ols.clone()))
                    .with_input(covariates.clone())
                    .with_output(ols_features.clone())
                    .with_output(config.transient(&names.ols_coefficients, DatasetKind::Table))
                    .with_output(config.transient(&names.ols_diagnostics, DatasetKind::Table)),
            )
            .stage(
                StageDefinition::new(
                    "autocorrelation",
                    StageParams::SpatialAutocorrelation(stages.autocorrelation.clone()),
                )
                .with_input(ols_features)
                .with_output(report),
            )
            .stage(
                StageDefinition::new(
                    "gwr",
                    StageParams::GeographicallyWeightedRegression(stages.gwr.clone()),
                )
                .with_input(covariates)
                .with_output(config.transient(&names.gwr_output, DatasetKind::Features)),
            )
            .extra_cleanup(config.extra_cleanup())
            .build()
    }
}
