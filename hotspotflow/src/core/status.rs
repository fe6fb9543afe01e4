//! Stage status, run status and operation enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The engine operation a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Remove a dataset from the catalog.
    Delete,
    /// Copy a feature class under a new name.
    Copy,
    /// Snap coincident features together within a tolerance.
    Integrate,
    /// Collapse coincident points into weighted points with a count field.
    AggregateToPoints,
    /// Getis-Ord hotspot classification.
    HotspotAnalysis,
    /// Interpolate a raster surface from point values.
    Interpolate,
    /// Global ordinary least squares regression.
    OrdinaryLeastSquares,
    /// Global spatial autocorrelation test.
    SpatialAutocorrelation,
    /// Geographically weighted regression.
    GeographicallyWeightedRegression,
}

impl Operation {
    /// Returns the operation's stable keyword.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::Integrate => "integrate",
            Self::AggregateToPoints => "aggregate_to_points",
            Self::HotspotAnalysis => "hotspot_analysis",
            Self::Interpolate => "interpolate",
            Self::OrdinaryLeastSquares => "ordinary_least_squares",
            Self::SpatialAutocorrelation => "spatial_autocorrelation",
            Self::GeographicallyWeightedRegression => "geographically_weighted_regression",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Stage inputs were verified and the engine call is in flight.
    Running,
    /// Engine call returned and every declared output exists.
    Succeeded,
    /// A precondition, the engine call, or a post-condition failed.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Terminal status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Succeeded,
    /// The run halted at the first failing stage.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Copy.to_string(), "copy");
        assert_eq!(Operation::HotspotAnalysis.to_string(), "hotspot_analysis");
        assert_eq!(
            Operation::GeographicallyWeightedRegression.to_string(),
            "geographically_weighted_regression"
        );
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Succeeded.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_stage_status_transitions() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Failed));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Succeeded));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Succeeded));
        assert!(!StageStatus::Succeeded.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::Failed.can_transition_to(StageStatus::Pending));
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Succeeded).unwrap();
        assert_eq!(json, r#""succeeded""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Succeeded);
    }

    #[test]
    fn test_operation_serialize() {
        let json = serde_json::to_string(&Operation::AggregateToPoints).unwrap();
        assert_eq!(json, r#""aggregate_to_points""#);
    }
}
