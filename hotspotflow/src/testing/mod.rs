//! Testing utilities for hotspotflow pipelines.
//!
//! This module provides:
//! - A deterministic in-memory engine with a call log
//! - Fault injection (withheld inputs, unmaterialized outputs, engine errors)
//! - Assertions over run reports

mod assertions;
mod stub;

pub use assertions::{assert_run_failed_at, assert_run_succeeded, assert_stage_statuses};
pub use stub::{EngineCall, StubDataset, StubEngine};
