//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage definitions and the validated stage registry
//! - The reference hotspot pipeline built from configuration
//! - The sequential runner

mod reference;
mod registry;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use registry::{RegistryBuilder, StageDefinition, StageParams, StageRegistry};
pub use runner::{PipelineRunner, CLEANUP_STAGE};
