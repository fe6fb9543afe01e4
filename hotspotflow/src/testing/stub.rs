//! Deterministic in-memory engine.

use crate::config::PipelineConfig;
use crate::core::{DatasetKind, DatasetRef, Workspace};
use crate::engine::{AggregateOutcome, AutocorrelationReport, GeoEngine, OlsOutputs, RasterSurface};
use crate::errors::EngineError;
use crate::params::{
    AutocorrelationParams, GwrParams, HotspotParams, IntegrateParams, InterpolateParams, OlsParams,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A dataset held by the stub catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubDataset {
    /// Artifact kind.
    pub kind: DatasetKind,
    /// Fingerprint of the dataset's lineage; equal lineage, equal content.
    pub content: String,
    /// Field name to field fingerprint.
    pub fields: BTreeMap<String, String>,
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    /// Operation keyword.
    pub operation: String,
    /// Workspace the call was scoped to.
    pub workspace: Workspace,
    /// Dataset names involved, inputs first.
    pub datasets: Vec<String>,
    /// Parameter bundle as received.
    pub params: serde_json::Value,
}

#[derive(Debug, Default)]
struct StubState {
    catalog: BTreeMap<String, StubDataset>,
    rasters: HashMap<String, StubDataset>,
    calls: Vec<EngineCall>,
    withheld: HashSet<String>,
    unmaterialized: HashSet<String>,
    failures: HashMap<String, String>,
}

/// An in-memory [`GeoEngine`] whose outputs are pure functions of inputs
/// and parameters.
#[derive(Debug)]
pub struct StubEngine {
    state: Mutex<StubState>,
    count_field: String,
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..8])
}

fn not_found(operation: &str, name: &str) -> EngineError {
    EngineError::operation(operation, format!("dataset '{name}' not found"))
}

impl StubEngine {
    /// Creates an empty stub catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            count_field: "ICOUNT".to_string(),
        }
    }

    /// Creates a stub holding the source datasets a configuration reads.
    #[must_use]
    pub fn seeded_for(config: &PipelineConfig) -> Self {
        Self::new()
            .with_dataset(config.datasets.incidents())
            .with_dataset(config.datasets.covariates())
    }

    /// Adds a long-lived dataset.
    #[must_use]
    pub fn with_dataset(self, dataset: DatasetRef) -> Self {
        self.insert(&dataset, fingerprint(&["source", dataset.name.as_str()]), BTreeMap::new());
        self
    }

    /// Sets the count field the aggregation reports.
    #[must_use]
    pub fn with_count_field(mut self, field: impl Into<String>) -> Self {
        self.count_field = field.into();
        self
    }

    /// Makes `exists` answer false for `name` from now on.
    pub fn withhold(&self, name: impl Into<String>) {
        self.state.lock().withheld.insert(name.into());
    }

    /// Lifts a previous [`withhold`](Self::withhold).
    pub fn release(&self, name: &str) {
        self.state.lock().withheld.remove(name);
    }

    /// Makes `operation` succeed without creating its outputs.
    ///
    /// For `delete`, the dataset is left in place.
    pub fn skip_outputs(&self, operation: impl Into<String>) {
        self.state.lock().unmaterialized.insert(operation.into());
    }

    /// Makes `operation` fail with `message`.
    pub fn fail_on(&self, operation: impl Into<String>, message: impl Into<String>) {
        self.state.lock().failures.insert(operation.into(), message.into());
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the calls other than catalog queries and deletes.
    #[must_use]
    pub fn analytic_calls(&self) -> Vec<EngineCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation != "exists" && c.operation != "delete")
            .cloned()
            .collect()
    }

    /// Returns how often `operation` was called.
    #[must_use]
    pub fn calls_for(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Returns a dataset by name, ignoring withholding.
    #[must_use]
    pub fn dataset(&self, name: &str) -> Option<StubDataset> {
        self.state.lock().catalog.get(name).cloned()
    }

    /// Returns the catalog contents.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StubDataset> {
        self.state.lock().catalog.clone()
    }

    /// Returns the catalog's dataset names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.state.lock().catalog.keys().cloned().collect()
    }

    fn insert(&self, dataset: &DatasetRef, content: String, fields: BTreeMap<String, String>) {
        self.state.lock().catalog.insert(
            dataset.name.clone(),
            StubDataset {
                kind: dataset.kind,
                content,
                fields,
            },
        );
    }

    /// Records the call and applies injected failures.
    fn enter(
        &self,
        operation: &str,
        workspace: &Workspace,
        datasets: &[&DatasetRef],
        params: serde_json::Value,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall {
            operation: operation.to_string(),
            workspace: workspace.clone(),
            datasets: datasets.iter().map(|d| d.name.clone()).collect(),
            params,
        });
        if let Some(message) = state.failures.get(operation) {
            return Err(EngineError::operation(operation, message.clone()));
        }
        Ok(!state.unmaterialized.contains(operation))
    }

    fn read(&self, operation: &str, dataset: &DatasetRef) -> Result<StubDataset, EngineError> {
        self.dataset(&dataset.name)
            .ok_or_else(|| not_found(operation, &dataset.name))
    }

    fn read_field(
        &self,
        operation: &str,
        dataset: &DatasetRef,
        field: &str,
    ) -> Result<StubDataset, EngineError> {
        let data = self.read(operation, dataset)?;
        if !data.fields.contains_key(field) {
            return Err(EngineError::operation(
                operation,
                format!("field '{field}' not found in '{}'", dataset.name),
            ));
        }
        Ok(data)
    }

    fn derive(
        &self,
        operation: &str,
        input: &StubDataset,
        params: &serde_json::Value,
        fields: &[&str],
    ) -> (String, BTreeMap<String, String>) {
        let params = params.to_string();
        let content = fingerprint(&[operation, input.content.as_str(), params.as_str()]);
        let mut derived = input.fields.clone();
        for field in fields {
            derived.insert((*field).to_string(), fingerprint(&[content.as_str(), *field]));
        }
        (content, derived)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

#[async_trait]
impl GeoEngine for StubEngine {
    async fn exists(&self, workspace: &Workspace, dataset: &DatasetRef) -> Result<bool, EngineError> {
        self.enter("exists", workspace, &[dataset], serde_json::Value::Null)?;
        let state = self.state.lock();
        Ok(!state.withheld.contains(&dataset.name) && state.catalog.contains_key(&dataset.name))
    }

    async fn delete(&self, workspace: &Workspace, dataset: &DatasetRef) -> Result<(), EngineError> {
        let materialize = self.enter("delete", workspace, &[dataset], serde_json::Value::Null)?;
        let mut state = self.state.lock();
        if !state.catalog.contains_key(&dataset.name) {
            return Err(not_found("delete", &dataset.name));
        }
        if materialize {
            state.catalog.remove(&dataset.name);
        }
        Ok(())
    }

    async fn copy(
        &self,
        workspace: &Workspace,
        source: &DatasetRef,
        dest: &DatasetRef,
    ) -> Result<(), EngineError> {
        let materialize = self.enter("copy", workspace, &[source, dest], serde_json::Value::Null)?;
        let data = self.read("copy", source)?;
        if materialize {
            self.insert(dest, data.content, data.fields);
        }
        Ok(())
    }

    async fn integrate(
        &self,
        workspace: &Workspace,
        dataset: &DatasetRef,
        params: &IntegrateParams,
    ) -> Result<(), EngineError> {
        let params = to_json(params);
        let materialize = self.enter("integrate", workspace, &[dataset], params.clone())?;
        let data = self.read("integrate", dataset)?;
        if materialize {
            let (content, fields) = self.derive("integrate", &data, &params, &[]);
            self.insert(dataset, content, fields);
        }
        Ok(())
    }

    async fn aggregate_to_points(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
    ) -> Result<AggregateOutcome, EngineError> {
        let materialize = self.enter(
            "aggregate_to_points",
            workspace,
            &[input, output],
            serde_json::Value::Null,
        )?;
        let data = self.read("aggregate_to_points", input)?;
        if materialize {
            let (content, fields) = self.derive(
                "aggregate_to_points",
                &data,
                &serde_json::Value::Null,
                &[self.count_field.as_str()],
            );
            self.insert(output, content, fields);
        }
        Ok(AggregateOutcome {
            count_field: self.count_field.clone(),
        })
    }

    async fn hotspot_analysis(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
        params: &HotspotParams,
    ) -> Result<(), EngineError> {
        let json = to_json(params);
        let materialize = self.enter("hotspot_analysis", workspace, &[input, output], json.clone())?;
        let data = self.read_field("hotspot_analysis", input, &params.input_field)?;
        if materialize {
            let (content, fields) =
                self.derive("hotspot_analysis", &data, &json, &["GiZScore", "GiPValue", "Gi_Bin"]);
            self.insert(output, content, fields);
        }
        Ok(())
    }

    async fn interpolate(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        params: &InterpolateParams,
    ) -> Result<RasterSurface, EngineError> {
        let json = to_json(params);
        self.enter("interpolate", workspace, &[input], json.clone())?;
        let data = self.read_field("interpolate", input, &params.value_field)?;
        let (content, _) = self.derive("interpolate", &data, &json, &[]);
        let handle = format!("raster:{content}");
        self.state.lock().rasters.insert(
            handle.clone(),
            StubDataset {
                kind: DatasetKind::Raster,
                content,
                fields: BTreeMap::new(),
            },
        );
        Ok(RasterSurface {
            handle,
            source: input.name.clone(),
            value_field: params.value_field.clone(),
        })
    }

    async fn save_raster(
        &self,
        workspace: &Workspace,
        raster: &RasterSurface,
        dest: &DatasetRef,
    ) -> Result<(), EngineError> {
        let materialize = self.enter("save_raster", workspace, &[dest], to_json(raster))?;
        let surface = self
            .state
            .lock()
            .rasters
            .get(&raster.handle)
            .cloned()
            .ok_or_else(|| EngineError::operation("save_raster", format!("unknown raster '{}'", raster.handle)))?;
        if materialize {
            self.insert(dest, surface.content, surface.fields);
        }
        Ok(())
    }

    async fn ordinary_least_squares(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        outputs: &OlsOutputs,
        params: &OlsParams,
    ) -> Result<(), EngineError> {
        let json = to_json(params);
        let materialize = self.enter(
            "ordinary_least_squares",
            workspace,
            &[input, &outputs.features, &outputs.coefficients, &outputs.diagnostics],
            json.clone(),
        )?;
        let data = self.read("ordinary_least_squares", input)?;
        if materialize {
            let (content, fields) =
                self.derive("ordinary_least_squares", &data, &json, &["Estimated", "Residual", "StdResid"]);
            self.insert(&outputs.features, content.clone(), fields);
            self.insert(&outputs.coefficients, fingerprint(&[content.as_str(), "coefficients"]), BTreeMap::new());
            self.insert(&outputs.diagnostics, fingerprint(&[content.as_str(), "diagnostics"]), BTreeMap::new());
        }
        Ok(())
    }

    async fn spatial_autocorrelation(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        params: &AutocorrelationParams,
    ) -> Result<AutocorrelationReport, EngineError> {
        let json = to_json(params);
        self.enter("spatial_autocorrelation", workspace, &[input], json.clone())?;
        let data = self.read_field("spatial_autocorrelation", input, &params.input_field)?;
        let (content, _) = self.derive("spatial_autocorrelation", &data, &json, &[]);
        let seed = u8::from_str_radix(&content[..2], 16).unwrap_or(0);
        let z_score = f64::from(seed) / 32.0;
        Ok(AutocorrelationReport {
            morans_index: z_score / 50.0,
            expected_index: -0.001,
            variance: 0.0004,
            z_score,
            p_value: if z_score > 1.96 { 0.01 } else { 0.5 },
            report_file: None,
        })
    }

    async fn geographically_weighted_regression(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
        params: &GwrParams,
    ) -> Result<(), EngineError> {
        let json = to_json(params);
        let materialize = self.enter(
            "geographically_weighted_regression",
            workspace,
            &[input, output],
            json.clone(),
        )?;
        let data = self.read("geographically_weighted_regression", input)?;
        if materialize {
            let (content, fields) = self.derive(
                "geographically_weighted_regression",
                &data,
                &json,
                &["Predicted", "Residual", "LocalR2"],
            );
            self.insert(output, content, fields);
        }
        Ok(())
    }
}
