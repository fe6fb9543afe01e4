//! Error types for hotspotflow.
//!
//! Every run-halting error carries the stage name, the engine operation and
//! the condition that broke, so an operator can fix the upstream data or
//! parameters and re-run from a clean slate.

use crate::core::{DatasetRef, Operation, RunReport};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input dataset did not exist when the stage was about to run.
    #[error("stage '{stage}' ({operation}): required input '{}' does not exist", dataset.name)]
    MissingInput {
        /// Stage name.
        stage: String,
        /// Operation the stage performs.
        operation: Operation,
        /// The absent input.
        dataset: DatasetRef,
    },

    /// The engine reported a failure during the stage's operation.
    #[error("stage '{stage}' ({operation}): engine operation failed: {source}")]
    EngineOperation {
        /// Stage name.
        stage: String,
        /// Operation the stage performs.
        operation: Operation,
        /// The engine diagnostic.
        #[source]
        source: EngineError,
    },

    /// The engine call returned without error but an expected output is absent.
    #[error("stage '{stage}' ({operation}): declared output '{}' was not created", dataset.name)]
    PostConditionViolation {
        /// Stage name.
        stage: String,
        /// Operation the stage performs.
        operation: Operation,
        /// The missing output.
        dataset: DatasetRef,
    },

    /// The stage registry failed validation.
    #[error("{0}")]
    Validation(#[from] RegistryValidationError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A run halted; carries the partial report and the stage-level cause.
    #[error("pipeline '{}' halted: {cause}", report.pipeline)]
    StageFailed {
        /// Report with every stage's final state.
        report: Box<RunReport>,
        /// What broke.
        cause: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Creates a missing input error.
    #[must_use]
    pub fn missing_input(stage: impl Into<String>, operation: Operation, dataset: DatasetRef) -> Self {
        Self::MissingInput {
            stage: stage.into(),
            operation,
            dataset,
        }
    }

    /// Creates an engine operation error.
    #[must_use]
    pub fn engine(stage: impl Into<String>, operation: Operation, source: EngineError) -> Self {
        Self::EngineOperation {
            stage: stage.into(),
            operation,
            source,
        }
    }

    /// Creates a post-condition violation.
    #[must_use]
    pub fn post_condition(stage: impl Into<String>, operation: Operation, dataset: DatasetRef) -> Self {
        Self::PostConditionViolation {
            stage: stage.into(),
            operation,
            dataset,
        }
    }

    /// Returns the stage the error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::MissingInput { stage, .. }
            | Self::EngineOperation { stage, .. }
            | Self::PostConditionViolation { stage, .. } => Some(stage),
            Self::StageFailed { cause, .. } => cause.stage(),
            Self::Validation(_) | Self::Config(_) => None,
        }
    }

    /// Returns a short name for the condition that broke.
    #[must_use]
    pub fn condition(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "precondition: input exists",
            Self::EngineOperation { .. } => "engine call succeeded",
            Self::PostConditionViolation { .. } => "post-condition: output exists",
            Self::Validation(_) => "registry validation",
            Self::Config(_) => "configuration",
            Self::StageFailed { cause, .. } => cause.condition(),
        }
    }

    /// Returns the partial run report, if the error came from a run.
    #[must_use]
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::StageFailed { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Returns the stage-level cause, unwrapping a halted run.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::StageFailed { cause, .. } => cause.root(),
            other => other,
        }
    }
}

/// Errors reported by the external geospatial engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected or failed the operation.
    #[error("{operation}: {message}")]
    Operation {
        /// Engine operation keyword.
        operation: String,
        /// Engine diagnostic.
        message: String,
    },

    /// The engine process could not be run or exited abnormally.
    #[error("engine process '{program}' failed (exit code {code:?}): {stderr}")]
    Process {
        /// Program that was invoked.
        program: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The engine answered with something that is not a valid response.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// IO error talking to the engine.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates an operation failure.
    #[must_use]
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Error raised when a stage registry is inconsistent.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RegistryValidationError {
    /// Error code (e.g., "REGISTRY-OUTPUT-COLLISION").
    pub code: &'static str,
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Hint for fixing the error.
    pub fix_hint: Option<&'static str>,
}

impl RegistryValidationError {
    /// Creates a new registry validation error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stages: Vec::new(),
            fix_hint: RegistrySuggestions::get(code),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Provides default suggestions for registry error codes.
pub struct RegistrySuggestions;

impl RegistrySuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "REGISTRY-EMPTY" => Some("Add at least one stage to the registry."),
            "REGISTRY-DUPLICATE-STAGE" => Some("Give every stage a unique name."),
            "REGISTRY-OUTPUT-COLLISION" => Some(
                "Rename one of the outputs, or declare the dataset as an input of the \
                 later stage if it is updated in place.",
            ),
            "REGISTRY-UNKNOWN-INPUT" => Some(
                "Declare the dataset as a source, or order the producing stage first.",
            ),
            "REGISTRY-ARITY" => Some("Check the number of inputs and outputs the operation expects."),
            "REGISTRY-IN-PLACE" => Some("Integration updates its input; declare the same dataset as output."),
            "REGISTRY-OUTPUT-KIND" => Some(
                "Interpolation writes a raster and autocorrelation writes a report; \
                 declare the output with that kind.",
            ),
            "REGISTRY-INVALID-NAME" => Some(
                "Dataset names must start with a letter or underscore and contain only \
                 letters, digits and underscores, with an optional extension such as `.dbf`.",
            ),
            _ => None,
        }
    }
}

/// Errors loading pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// IO cause.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_context() {
        let err = PipelineError::missing_input(
            "ols",
            Operation::OrdinaryLeastSquares,
            DatasetRef::table("ObsData911Calls"),
        );

        assert_eq!(err.stage(), Some("ols"));
        assert_eq!(err.condition(), "precondition: input exists");
        assert!(err.to_string().contains("ObsData911Calls"));
        assert!(err.to_string().contains("ordinary_least_squares"));
    }

    #[test]
    fn test_engine_error_chain() {
        let err = PipelineError::engine(
            "hotspot",
            Operation::HotspotAnalysis,
            EngineError::operation("hotspot_analysis", "field ICOUNT not found"),
        );

        assert_eq!(err.condition(), "engine call succeeded");
        assert!(err.to_string().contains("field ICOUNT not found"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_stage_failed_unwraps_to_root() {
        let report = RunReport::new("hotspot", "ws", Vec::new());
        let cause = PipelineError::post_condition("collect_events", Operation::AggregateToPoints, DatasetRef::points("calls_count"));
        let err = PipelineError::StageFailed {
            report: Box::new(report),
            cause: Box::new(cause),
        };

        assert_eq!(err.stage(), Some("collect_events"));
        assert_eq!(err.condition(), "post-condition: output exists");
        assert!(matches!(err.root(), PipelineError::PostConditionViolation { .. }));
        assert!(err.report().is_some());
    }

    #[test]
    fn test_registry_suggestions() {
        let err = RegistryValidationError::new("REGISTRY-OUTPUT-COLLISION", "collision")
            .with_stages(vec!["a".into(), "b".into()]);
        assert!(err.fix_hint.is_some());
        assert_eq!(err.stages.len(), 2);
        assert!(RegistrySuggestions::get("UNKNOWN").is_none());
    }
}
