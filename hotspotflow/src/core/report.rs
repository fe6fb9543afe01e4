//! Per-stage and per-run reports.

use super::{Operation, RunArtifact, RunStatus, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name.
    pub name: String,
    /// The engine operation it performs.
    pub operation: Operation,
    /// Current state.
    pub status: StageStatus,
    /// Fingerprint of the parameter bundle.
    pub params_digest: String,
    /// Wall time of the engine call, once it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Declared output names.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    /// Creates a pending stage report.
    #[must_use]
    pub fn pending(
        name: impl Into<String>,
        operation: Operation,
        params_digest: impl Into<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            operation,
            status: StageStatus::Pending,
            params_digest: params_digest.into(),
            duration_ms: None,
            outputs,
            error: None,
        }
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Workspace the run wrote to.
    pub workspace: String,
    /// When the cleanup phase started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal status, once reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// Datasets deleted during cleanup.
    #[serde(default)]
    pub cleaned: Vec<String>,
    /// Stage reports in execution order.
    pub stages: Vec<StageReport>,
    /// Datasets and reports produced by succeeded stages.
    #[serde(default)]
    pub artifacts: Vec<RunArtifact>,
}

impl RunReport {
    /// Creates a report for a run that is about to start.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, workspace: impl Into<String>, stages: Vec<StageReport>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            workspace: workspace.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            cleaned: Vec::new(),
            stages,
            artifacts: Vec::new(),
        }
    }

    /// Looks up a stage report by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the status of the named stage.
    #[must_use]
    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|s| s.status)
    }

    /// Returns the first failed stage, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status.is_failure())
    }

    /// Returns the names of succeeded stages, in order.
    #[must_use]
    pub fn succeeded_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status.is_success())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Returns the names of every recorded artifact, in production order.
    #[must_use]
    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.name.as_str()).collect()
    }

    /// Returns true if the run finished and every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Some(RunStatus::Succeeded)
    }

    /// Marks the run finished with the given status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = Some(status);
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DatasetKind;

    fn sample() -> RunReport {
        RunReport::new(
            "hotspot",
            "./final_project.gdb",
            vec![
                StageReport::pending("clean_copy", Operation::Copy, "aa", vec!["calls".into()]),
                StageReport::pending("integrate", Operation::Integrate, "bb", vec!["calls".into()]),
            ],
        )
    }

    #[test]
    fn test_new_report_is_pending() {
        let report = sample();
        assert!(report.status.is_none());
        assert!(!report.is_success());
        assert_eq!(report.stage_status("integrate"), Some(StageStatus::Pending));
        assert!(report.failed_stage().is_none());
    }

    #[test]
    fn test_finish_and_lookup() {
        let mut report = sample();
        report.stages[0].status = StageStatus::Succeeded;
        report.stages[1].status = StageStatus::Failed;
        report
            .artifacts
            .push(RunArtifact::new("calls", DatasetKind::PointFeatures, "clean_copy"));
        report.finish(RunStatus::Failed);

        assert_eq!(report.succeeded_stages(), vec!["clean_copy"]);
        assert_eq!(report.failed_stage().map(|s| s.name.as_str()), Some("integrate"));
        assert_eq!(report.artifact_names(), vec!["calls"]);
        assert!(report.finished_at.is_some());
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_serialization() {
        let report = sample();
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.stages.len(), 2);
    }
}
