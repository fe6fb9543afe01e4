//! # Hotspotflow
//!
//! Staged orchestration of an incident hotspot and regression analysis.
//!
//! Hotspotflow sequences calls against an external geospatial engine:
//!
//! - **Stage registry**: an ordered, validated list of stages with their
//!   input/output datasets and parameter bundles
//! - **Feature store**: workspace-scoped existence checks, deletes and copies
//! - **Runner**: cleanup, then strictly sequential fail-fast execution with
//!   pre- and post-condition checks around every stage
//! - **Events and tracing**: every transition is emitted to an event sink and
//!   recorded in a structured span
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hotspotflow::prelude::*;
//!
//! let config = PipelineConfig::load(Path::new("hotspot.toml"))?;
//! let registry = StageRegistry::reference(&config)?;
//! let store = FeatureStore::new(Arc::new(CommandEngine::new(program)), config.workspace());
//!
//! let report = PipelineRunner::new(registry, store).run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod params;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod telemetry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        DatasetKind, DatasetRef, Operation, RunArtifact, RunReport, RunStatus, StageReport,
        StageStatus, Workspace,
    };
    pub use crate::engine::{CommandEngine, GeoEngine};
    pub use crate::errors::{EngineError, PipelineError, RegistryValidationError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RunEvent, RunEventKind,
    };
    pub use crate::pipeline::{PipelineRunner, StageDefinition, StageParams, StageRegistry};
    pub use crate::stages::{StageExecutor, StageOutput};
    pub use crate::store::FeatureStore;
}
