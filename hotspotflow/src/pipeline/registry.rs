//! Stage definitions and the validated stage registry.

use crate::core::{DatasetKind, DatasetRef, Operation};
use crate::errors::RegistryValidationError;
use crate::params::{
    AggregateParams, AutocorrelationParams, GwrParams, HotspotParams, IntegrateParams,
    InterpolateParams, OlsParams,
};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Typed parameter bundle of a stage, one variant per operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum StageParams {
    /// Dataset copy; no parameters.
    Copy,
    /// In-place spatial integration.
    Integrate(IntegrateParams),
    /// Coincident event aggregation.
    AggregateToPoints(AggregateParams),
    /// Hotspot classification.
    HotspotAnalysis(HotspotParams),
    /// Surface interpolation.
    Interpolate(InterpolateParams),
    /// Global regression.
    OrdinaryLeastSquares(OlsParams),
    /// Residual autocorrelation test.
    SpatialAutocorrelation(AutocorrelationParams),
    /// Geographically weighted regression.
    GeographicallyWeightedRegression(GwrParams),
}

impl StageParams {
    /// Returns the engine operation the bundle parameterizes.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Copy => Operation::Copy,
            Self::Integrate(_) => Operation::Integrate,
            Self::AggregateToPoints(_) => Operation::AggregateToPoints,
            Self::HotspotAnalysis(_) => Operation::HotspotAnalysis,
            Self::Interpolate(_) => Operation::Interpolate,
            Self::OrdinaryLeastSquares(_) => Operation::OrdinaryLeastSquares,
            Self::SpatialAutocorrelation(_) => Operation::SpatialAutocorrelation,
            Self::GeographicallyWeightedRegression(_) => Operation::GeographicallyWeightedRegression,
        }
    }

    /// Returns the number of (inputs, outputs) the operation takes.
    #[must_use]
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::OrdinaryLeastSquares(_) => (1, 3),
            _ => (1, 1),
        }
    }

    /// Returns the kind the output at `index` must have, if constrained.
    #[must_use]
    pub fn required_output_kind(&self, index: usize) -> Option<DatasetKind> {
        match (self, index) {
            (Self::Interpolate(_), 0) => Some(DatasetKind::Raster),
            (Self::SpatialAutocorrelation(_), 0) => Some(DatasetKind::Report),
            _ => None,
        }
    }
}

/// One analytic step: its data dependencies and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage name.
    pub name: String,
    /// Datasets read, in operation order.
    pub inputs: Vec<DatasetRef>,
    /// Datasets or reports written, in operation order.
    pub outputs: Vec<DatasetRef>,
    /// Parameter bundle.
    pub params: StageParams,
}

impl StageDefinition {
    /// Creates a stage with no inputs or outputs yet.
    #[must_use]
    pub fn new(name: impl Into<String>, params: StageParams) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params,
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, dataset: DatasetRef) -> Self {
        self.inputs.push(dataset);
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, dataset: DatasetRef) -> Self {
        self.outputs.push(dataset);
        self
    }

    /// Returns the engine operation.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.params.operation()
    }

    /// Returns the input at `index`.
    pub fn input(&self, index: usize) -> Result<&DatasetRef, StoreError> {
        self.inputs.get(index).ok_or_else(|| {
            StoreError::InvalidDefinition(format!("stage '{}' has no input #{index}", self.name))
        })
    }

    /// Returns the output at `index`.
    pub fn output(&self, index: usize) -> Result<&DatasetRef, StoreError> {
        self.outputs.get(index).ok_or_else(|| {
            StoreError::InvalidDefinition(format!("stage '{}' has no output #{index}", self.name))
        })
    }

    /// Returns the outputs that are catalog datasets.
    pub fn persisted_outputs(&self) -> impl Iterator<Item = &DatasetRef> {
        self.outputs.iter().filter(|d| d.is_persisted())
    }

    /// Returns true if the stage reads a dataset named `name`.
    #[must_use]
    pub fn reads(&self, name: &str) -> bool {
        self.inputs.iter().any(|d| d.name == name)
    }

    /// Returns a stable fingerprint of the parameter bundle.
    #[must_use]
    pub fn params_digest(&self) -> String {
        let json = serde_json::to_string(&self.params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

/// Ordered, validated stage definitions plus the datasets they start from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRegistry {
    name: String,
    sources: Vec<DatasetRef>,
    stages: Vec<StageDefinition>,
    extra_cleanup: Vec<DatasetRef>,
}

impl StageRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(name)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the long-lived source datasets.
    #[must_use]
    pub fn sources(&self) -> &[DatasetRef] {
        &self.sources
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages. Never true for a built registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns every dataset the cleanup phase deletes.
    ///
    /// Persisted stage outputs come first, in stage order, then the extra
    /// targets. Each name appears once.
    #[must_use]
    pub fn cleanup_targets(&self) -> Vec<DatasetRef> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .flat_map(StageDefinition::persisted_outputs)
            .chain(self.extra_cleanup.iter())
            .filter(|d| seen.insert(d.name.clone()))
            .cloned()
            .collect()
    }
}

/// Builder for a validated [`StageRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    name: String,
    sources: Vec<DatasetRef>,
    stages: Vec<StageDefinition>,
    extra_cleanup: Vec<DatasetRef>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            stages: Vec::new(),
            extra_cleanup: Vec::new(),
        }
    }

    /// Declares a long-lived source dataset.
    #[must_use]
    pub fn source(mut self, dataset: DatasetRef) -> Self {
        self.sources.push(dataset);
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds cleanup targets no stage produces.
    #[must_use]
    pub fn extra_cleanup(mut self, datasets: impl IntoIterator<Item = DatasetRef>) -> Self {
        self.extra_cleanup.extend(datasets);
        self
    }

    /// Validates and builds the registry.
    pub fn build(self) -> Result<StageRegistry, RegistryValidationError> {
        if self.stages.is_empty() {
            return Err(RegistryValidationError::new(
                "REGISTRY-EMPTY",
                format!("Pipeline '{}' has no stages", self.name),
            ));
        }

        for dataset in self.sources.iter().chain(&self.extra_cleanup) {
            check_name(dataset, None)?;
        }

        let source_names: HashSet<&str> = self.sources.iter().map(|d| d.name.as_str()).collect();
        if let Some(dataset) = self
            .extra_cleanup
            .iter()
            .find(|d| source_names.contains(d.name.as_str()))
        {
            return Err(RegistryValidationError::new(
                "REGISTRY-OUTPUT-COLLISION",
                format!("Cleanup target '{}' is a source dataset", dataset.name),
            ));
        }

        let mut stage_names: HashSet<&str> = HashSet::new();
        // Persisted dataset name -> producing stage.
        let mut produced: Vec<(&str, &str)> = Vec::new();
        // Report name -> producing stage. Reports are never inputs.
        let mut reports: Vec<(&str, &str)> = Vec::new();

        for stage in &self.stages {
            if !stage_names.insert(stage.name.as_str()) {
                return Err(RegistryValidationError::new(
                    "REGISTRY-DUPLICATE-STAGE",
                    format!("Stage '{}' is defined more than once", stage.name),
                )
                .with_stages(vec![stage.name.clone()]));
            }

            check_shape(stage)?;

            for dataset in stage.inputs.iter().chain(&stage.outputs) {
                check_name(dataset, Some(&stage.name))?;
            }

            for input in &stage.inputs {
                let known = source_names.contains(input.name.as_str())
                    || produced.iter().any(|(name, _)| *name == input.name);
                if !known {
                    return Err(RegistryValidationError::new(
                        "REGISTRY-UNKNOWN-INPUT",
                        format!(
                            "Stage '{}' reads '{}', which is neither a source nor produced by an earlier stage",
                            stage.name, input.name
                        ),
                    )
                    .with_stages(vec![stage.name.clone()]));
                }
            }

            let mut own: HashSet<&str> = HashSet::new();
            for output in &stage.outputs {
                if !own.insert(output.name.as_str()) {
                    return Err(RegistryValidationError::new(
                        "REGISTRY-OUTPUT-COLLISION",
                        format!("Stage '{}' declares output '{}' twice", stage.name, output.name),
                    )
                    .with_stages(vec![stage.name.clone()]));
                }
                if source_names.contains(output.name.as_str()) {
                    return Err(RegistryValidationError::new(
                        "REGISTRY-OUTPUT-COLLISION",
                        format!("Stage '{}' overwrites source dataset '{}'", stage.name, output.name),
                    )
                    .with_stages(vec![stage.name.clone()]));
                }
                if let Some((_, producer)) = reports.iter().find(|(name, _)| *name == output.name) {
                    return Err(RegistryValidationError::new(
                        "REGISTRY-OUTPUT-COLLISION",
                        format!(
                            "Stage '{}' writes '{}', already produced as a report by stage '{}'",
                            stage.name, output.name, producer
                        ),
                    )
                    .with_stages(vec![(*producer).to_string(), stage.name.clone()]));
                }
                if let Some((_, producer)) = produced.iter().find(|(name, _)| *name == output.name) {
                    if !stage.reads(&output.name) || !output.is_persisted() {
                        return Err(RegistryValidationError::new(
                            "REGISTRY-OUTPUT-COLLISION",
                            format!(
                                "Stage '{}' writes '{}', already produced by stage '{}'",
                                stage.name, output.name, producer
                            ),
                        )
                        .with_stages(vec![(*producer).to_string(), stage.name.clone()]));
                    }
                }
            }

            for output in &stage.outputs {
                let seen = if output.is_persisted() { &mut produced } else { &mut reports };
                if !seen.iter().any(|(name, _)| *name == output.name) {
                    seen.push((output.name.as_str(), stage.name.as_str()));
                }
            }
        }

        Ok(StageRegistry {
            name: self.name,
            sources: self.sources,
            stages: self.stages,
            extra_cleanup: self.extra_cleanup,
        })
    }
}

fn check_name(dataset: &DatasetRef, stage: Option<&str>) -> Result<(), RegistryValidationError> {
    if dataset.has_valid_name() {
        return Ok(());
    }
    let err = RegistryValidationError::new(
        "REGISTRY-INVALID-NAME",
        format!("'{}' is not a valid dataset name", dataset.name),
    );
    Err(match stage {
        Some(stage) => err.with_stages(vec![stage.to_string()]),
        None => err,
    })
}

fn check_shape(stage: &StageDefinition) -> Result<(), RegistryValidationError> {
    let (inputs, outputs) = stage.params.arity();
    if stage.inputs.len() != inputs || stage.outputs.len() != outputs {
        return Err(RegistryValidationError::new(
            "REGISTRY-ARITY",
            format!(
                "Stage '{}' ({}) takes {inputs} input(s) and {outputs} output(s), got {} and {}",
                stage.name,
                stage.operation(),
                stage.inputs.len(),
                stage.outputs.len()
            ),
        )
        .with_stages(vec![stage.name.clone()]));
    }

    if matches!(stage.params, StageParams::Integrate(_)) && stage.inputs[0].name != stage.outputs[0].name {
        return Err(RegistryValidationError::new(
            "REGISTRY-IN-PLACE",
            format!(
                "Stage '{}' integrates '{}' in place but declares output '{}'",
                stage.name, stage.inputs[0].name, stage.outputs[0].name
            ),
        )
        .with_stages(vec![stage.name.clone()]));
    }

    for (index, output) in stage.outputs.iter().enumerate() {
        let required = stage.params.required_output_kind(index);
        let mismatch = match required {
            Some(kind) => output.kind != kind,
            None => !output.is_persisted(),
        };
        if mismatch {
            return Err(RegistryValidationError::new(
                "REGISTRY-OUTPUT-KIND",
                format!(
                    "Stage '{}' output '{}' has kind {}",
                    stage.name, output.name, output.kind
                ),
            )
            .with_stages(vec![stage.name.clone()]));
        }
    }

    Ok(())
}
