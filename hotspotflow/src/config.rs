//! Pipeline configuration.
//!
//! A few notes:
//!
//! - Every field has a default, and the defaults reproduce the reference study
//! - A relative workspace path is resolved against the config file's directory
//! - Parameter bundles are typed; engine keywords are validated at load time

use crate::core::{is_valid_identifier, DatasetKind, DatasetRef, Workspace};
use crate::errors::ConfigError;
use crate::params::{
    AggregateParams, AutocorrelationParams, GwrParams, HotspotParams, IntegrateParams,
    InterpolateParams, OlsParams,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline name, used in reports and logs.
    pub name: String,
    /// Where datasets live.
    pub workspace: WorkspaceSettings,
    /// How transient dataset names are derived.
    pub naming: NamingConvention,
    /// Dataset names, before the naming convention is applied.
    pub datasets: DatasetNames,
    /// Additional cleanup targets.
    pub cleanup: CleanupSettings,
    /// Per-stage parameter bundles.
    pub stages: StageSettings,
    /// External engine bridge.
    pub engine: EngineSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "hotspot".to_string(),
            workspace: WorkspaceSettings::default(),
            naming: NamingConvention::default(),
            datasets: DatasetNames::default(),
            cleanup: CleanupSettings::default(),
            stages: StageSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;

        if config.workspace.path.is_relative() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                config.workspace.path = dir.join(&config.workspace.path);
            }
        }

        debug!(path = %path.display(), workspace = %config.workspace.path.display(), "Loaded config");
        Ok(config)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("pipeline name must not be empty".to_string()));
        }
        if self.workspace.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("workspace path must not be empty".to_string()));
        }
        self.naming.validate()?;
        if !(self.stages.hotspot.distance_threshold.is_finite()
            && self.stages.hotspot.distance_threshold > 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "stages.hotspot.distance_threshold must be positive, got {}",
                self.stages.hotspot.distance_threshold
            )));
        }
        for (stage, fields) in [
            ("ols", &self.stages.ols.explanatory_fields),
            ("gwr", &self.stages.gwr.explanatory_fields),
        ] {
            if fields.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stages.{stage}.explanatory_fields must not be empty"
                )));
            }
        }
        self.validate_fields()?;

        // Hotspot classification reads the field aggregation writes.
        let count_field = &self.stages.collect_events.count_field;
        if self.stages.hotspot.input_field != *count_field {
            return Err(ConfigError::Invalid(format!(
                "stages.hotspot.input_field '{}' must match stages.collect_events.count_field '{count_field}'",
                self.stages.hotspot.input_field
            )));
        }
        Ok(())
    }

    fn validate_fields(&self) -> Result<(), ConfigError> {
        let stages = &self.stages;
        let single = [
            ("collect_events.count_field", &stages.collect_events.count_field),
            ("hotspot.input_field", &stages.hotspot.input_field),
            ("interpolate.value_field", &stages.interpolate.value_field),
            ("ols.unique_id_field", &stages.ols.unique_id_field),
            ("ols.dependent_field", &stages.ols.dependent_field),
            ("autocorrelation.input_field", &stages.autocorrelation.input_field),
            ("gwr.dependent_field", &stages.gwr.dependent_field),
        ];
        let listed = stages
            .ols
            .explanatory_fields
            .iter()
            .map(|f| ("ols.explanatory_fields", f))
            .chain(stages.gwr.explanatory_fields.iter().map(|f| ("gwr.explanatory_fields", f)));

        for (key, field) in single.into_iter().chain(listed) {
            if !is_valid_identifier(field) {
                return Err(ConfigError::Invalid(format!(
                    "stages.{key} '{field}' is not a valid field name"
                )));
            }
        }
        Ok(())
    }

    /// Overrides the workspace location.
    #[must_use]
    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace.path = path.into();
        self
    }

    /// Overrides the transient name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.naming.transient_prefix = prefix.into();
        self
    }

    /// Returns the workspace handle.
    #[must_use]
    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.workspace.path)
    }

    /// Returns a transient dataset reference with the naming convention applied.
    #[must_use]
    pub fn transient(&self, name: &str, kind: DatasetKind) -> DatasetRef {
        DatasetRef::new(self.naming.apply(name), kind)
    }

    /// Returns the extra cleanup targets with the naming convention applied.
    #[must_use]
    pub fn extra_cleanup(&self) -> Vec<DatasetRef> {
        self.cleanup
            .extra
            .iter()
            .map(|name| self.transient(name, DatasetKind::Features))
            .collect()
    }
}

/// Workspace location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Path of the workspace (e.g. a file geodatabase).
    pub path: PathBuf,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./final_project.gdb"),
        }
    }
}

/// Derives transient dataset names.
///
/// Source datasets are never renamed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConvention {
    /// Prepended to every pipeline-produced dataset name.
    pub transient_prefix: String,
}

impl NamingConvention {
    /// Applies the convention to a transient name.
    #[must_use]
    pub fn apply(&self, name: &str) -> String {
        format!("{}{name}", self.transient_prefix)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self
            .transient_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "naming.transient_prefix '{}' may only contain letters, digits and underscores",
                self.transient_prefix
            )))
        }
    }
}

/// Dataset names used by the reference pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetNames {
    /// Raw incident points (source).
    pub incidents: String,
    /// Covariate table for the regressions (source).
    pub covariates: String,
    /// Cleaned, integrated working copy.
    pub working: String,
    /// Count-aggregated points.
    pub counts: String,
    /// Hotspot classification.
    pub hotspots: String,
    /// Interpolated visualization raster.
    pub surface: String,
    /// OLS output features.
    pub ols_features: String,
    /// OLS coefficient table.
    pub ols_coefficients: String,
    /// OLS diagnostic table.
    pub ols_diagnostics: String,
    /// Autocorrelation report.
    pub autocorrelation_report: String,
    /// GWR output features.
    pub gwr_output: String,
}

impl Default for DatasetNames {
    fn default() -> Self {
        Self {
            incidents: "original_calls".to_string(),
            covariates: "ObsData911Calls".to_string(),
            working: "calls".to_string(),
            counts: "calls_count".to_string(),
            hotspots: "calls_hotspot".to_string(),
            surface: "visualize_surface_calls".to_string(),
            ols_features: "obs_calls".to_string(),
            ols_coefficients: "olsCoefTab.dbf".to_string(),
            ols_diagnostics: "olsDiagTab.dbf".to_string(),
            autocorrelation_report: "obs_calls_autocorrelation".to_string(),
            gwr_output: "gwr_911_calls".to_string(),
        }
    }
}

impl DatasetNames {
    /// The raw incident source.
    #[must_use]
    pub fn incidents(&self) -> DatasetRef {
        DatasetRef::points(&self.incidents)
    }

    /// The covariate source.
    #[must_use]
    pub fn covariates(&self) -> DatasetRef {
        DatasetRef::table(&self.covariates)
    }
}

/// Additional datasets to delete during cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Known artifacts of prior runs not produced by any current stage.
    pub extra: Vec<String>,
}

/// Parameter bundles, one per parameterized stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Spatial integration.
    pub integrate: IntegrateParams,
    /// Event aggregation.
    pub collect_events: AggregateParams,
    /// Hotspot classification.
    pub hotspot: HotspotParams,
    /// Visualization interpolation.
    pub interpolate: InterpolateParams,
    /// Global regression.
    pub ols: OlsParams,
    /// Residual autocorrelation.
    pub autocorrelation: AutocorrelationParams,
    /// Geographically weighted regression.
    pub gwr: GwrParams,
}

/// External engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Engine executable. Required by `run`.
    pub program: Option<PathBuf>,
    /// Leading arguments passed before the operation keyword.
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{BandwidthMethod, KernelType, LinearDistance, SpatialRelation};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_reference() {
        let config = PipelineConfig::from_toml_str("").unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.workspace.path, PathBuf::from("./final_project.gdb"));
        assert_eq!(config.stages.integrate.tolerance, LinearDistance::feet(30.0));
        assert_eq!(config.stages.hotspot.distance_threshold, 1400.0);
        assert_eq!(config.stages.gwr.kernel, KernelType::Adaptive);
        assert_eq!(config.stages.gwr.bandwidth, BandwidthMethod::Aicc);
    }

    #[test]
    fn test_partial_override_merges() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [naming]
            transient_prefix = "_"

            [stages.hotspot]
            distance_threshold = 2000
            spatial_relation = "INVERSE_DISTANCE"

            [stages.integrate]
            tolerance = "10 meters"
            "#,
        )
        .unwrap();

        assert_eq!(config.naming.transient_prefix, "_");
        assert_eq!(config.stages.hotspot.distance_threshold, 2000.0);
        assert_eq!(config.stages.hotspot.spatial_relation, SpatialRelation::InverseDistance);
        assert_eq!(config.stages.hotspot.input_field, "ICOUNT");
        assert_eq!(config.stages.integrate.tolerance.to_string(), "10 meters");
        assert_eq!(config.datasets, DatasetNames::default());
    }

    #[test]
    fn test_unknown_keyword_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [stages.gwr]
            kernel = "GAUSSIAN"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PipelineConfig::from_toml_str("[naming]\ntransient_prefix = \"a-b\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = PipelineConfig::from_toml_str("[stages.hotspot]\ndistance_threshold = -5").unwrap_err();
        assert!(err.to_string().contains("distance_threshold"));

        let err = PipelineConfig::from_toml_str("[stages.ols]\nexplanatory_fields = []").unwrap_err();
        assert!(err.to_string().contains("stages.ols"));
    }

    #[test]
    fn test_count_field_must_feed_hotspot() {
        let err = PipelineConfig::from_toml_str("[stages.collect_events]\ncount_field = \"Join_Count\"")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("stages.hotspot.input_field 'ICOUNT'"));

        let config = PipelineConfig::from_toml_str(
            r#"
            [stages.collect_events]
            count_field = "Join_Count"

            [stages.hotspot]
            input_field = "Join_Count"
            "#,
        )
        .unwrap();
        assert_eq!(config.stages.hotspot.input_field, "Join_Count");
    }

    #[test]
    fn test_field_names_checked() {
        let err = PipelineConfig::from_toml_str("[stages.interpolate]\nvalue_field = \"Gi Z\"").unwrap_err();
        assert!(err.to_string().contains("stages.interpolate.value_field"));

        let err = PipelineConfig::from_toml_str("[stages.gwr]\nexplanatory_fields = [\"Pop\", \"2Jobs\"]")
            .unwrap_err();
        assert!(err.to_string().contains("stages.gwr.explanatory_fields '2Jobs'"));

        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_resolves_workspace_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotspot.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "name = \"city\"\n[workspace]\npath = \"data/city.gdb\"").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.name, "city");
        assert_eq!(config.workspace.path, dir.path().join("data/city.gdb"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_naming_applies_to_transient_only() {
        let config = PipelineConfig::default().with_prefix("_");

        assert_eq!(config.transient("calls", DatasetKind::PointFeatures).name, "_calls");
        assert_eq!(config.datasets.incidents().name, "original_calls");
        assert_eq!(config.datasets.covariates().name, "ObsData911Calls");
    }

    #[test]
    fn test_extra_cleanup_prefixed() {
        let mut config = PipelineConfig::default().with_prefix("_");
        config.cleanup.extra = vec!["calls_old".to_string()];

        let extra = config.extra_cleanup();
        assert_eq!(extra.len(), 1);
        assert_eq!(extra[0].name, "_calls_old");
    }
}
