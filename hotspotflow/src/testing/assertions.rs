//! Test assertions for run reports.

use crate::core::{RunReport, StageStatus};
use crate::errors::PipelineError;

/// Asserts that the run finished and every stage succeeded.
pub fn assert_run_succeeded(report: &RunReport) {
    assert!(
        report.is_success(),
        "Expected run to succeed, got status {:?}; failed stage: {:?}",
        report.status,
        report.failed_stage().map(|s| (&s.name, &s.error))
    );
    for stage in &report.stages {
        assert_eq!(
            stage.status,
            StageStatus::Succeeded,
            "Expected stage '{}' to succeed",
            stage.name
        );
    }
}

/// Asserts that a run halted at `stage` and returns its partial report.
pub fn assert_run_failed_at<'a>(err: &'a PipelineError, stage: &str) -> &'a RunReport {
    let report = err
        .report()
        .unwrap_or_else(|| panic!("Expected a halted run, got: {err}"));
    assert_eq!(
        err.stage(),
        Some(stage),
        "Expected failure at stage '{stage}', got: {err}"
    );
    assert!(!report.is_success(), "Expected run status Failed");
    report
}

/// Asserts the status of each named stage.
pub fn assert_stage_statuses(report: &RunReport, expected: &[(&str, StageStatus)]) {
    for (name, status) in expected {
        assert_eq!(
            report.stage_status(name),
            Some(*status),
            "Unexpected status for stage '{name}'"
        );
    }
}
