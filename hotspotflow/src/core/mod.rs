//! Core domain model types for hotspotflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Dataset references and the workspace handle
//! - Stage status, run status and operation enums
//! - Stage/run reports and the artifacts a run records

mod artifact;
mod dataset;
mod report;
mod status;

pub use artifact::RunArtifact;
pub use dataset::{is_valid_identifier, DatasetKind, DatasetRef, Workspace};
pub use report::{RunReport, StageReport};
pub use status::{Operation, RunStatus, StageStatus};
