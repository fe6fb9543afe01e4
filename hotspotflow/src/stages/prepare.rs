//! Preparation stages: copy, integrate, collect events.

use super::{params_mismatch, StageExecutor, StageOutput};
use crate::core::Operation;
use crate::errors::EngineError;
use crate::pipeline::{StageDefinition, StageParams};
use crate::store::{FeatureStore, StoreError};
use async_trait::async_trait;
use tracing::debug;

/// Copies the raw incidents to a working dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyExecutor;

#[async_trait]
impl StageExecutor for CopyExecutor {
    fn operation(&self) -> Operation {
        Operation::Copy
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        if !matches!(stage.params, StageParams::Copy) {
            return Err(params_mismatch(stage, self.operation()));
        }
        store.copy(stage.input(0)?, stage.output(0)?).await?;
        Ok(StageOutput::ok_empty())
    }
}

/// Snaps nearby incidents together, in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrateExecutor;

#[async_trait]
impl StageExecutor for IntegrateExecutor {
    fn operation(&self) -> Operation {
        Operation::Integrate
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::Integrate(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        let dataset = stage.input(0)?;
        store
            .engine()
            .integrate(store.workspace(), dataset, params)
            .await?;
        debug!(dataset = %dataset.name, tolerance = %params.tolerance, "Integrated");
        Ok(StageOutput::ok_empty())
    }
}

/// Collapses coincident incidents into weighted points.
///
/// The engine names the count field; downstream hotspot parameters refer to
/// it, so a field other than the configured one fails the stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateExecutor;

#[async_trait]
impl StageExecutor for AggregateExecutor {
    fn operation(&self) -> Operation {
        Operation::AggregateToPoints
    }

    async fn execute(&self, stage: &StageDefinition, store: &FeatureStore) -> Result<StageOutput, StoreError> {
        let StageParams::AggregateToPoints(params) = &stage.params else {
            return Err(params_mismatch(stage, self.operation()));
        };
        let output = stage.output(0)?;
        let outcome = store
            .engine()
            .aggregate_to_points(store.workspace(), stage.input(0)?, output)
            .await?;

        if outcome.count_field != params.count_field {
            return Err(EngineError::operation(
                self.operation().as_str(),
                format!(
                    "engine reported count field '{}', expected '{}'",
                    outcome.count_field, params.count_field
                ),
            )
            .into());
        }

        Ok(StageOutput::ok_empty().add_metadata("count_field", serde_json::json!(outcome.count_field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DatasetRef, Workspace};
    use crate::engine::{AggregateOutcome, MockGeoEngine};
    use crate::params::{AggregateParams, IntegrateParams, LinearDistance};
    use crate::testing::StubEngine;
    use mockall::predicate::eq;
    use std::sync::Arc;

    fn collect_events() -> StageDefinition {
        StageDefinition::new("collect_events", StageParams::AggregateToPoints(AggregateParams::default()))
            .with_input(DatasetRef::points("calls"))
            .with_output(DatasetRef::points("calls_count"))
    }

    #[tokio::test]
    async fn test_copy_creates_destination() {
        let stub = Arc::new(StubEngine::new().with_dataset(DatasetRef::points("original_calls")));
        let store = FeatureStore::new(stub.clone(), Workspace::new("ws.gdb"));
        let stage = StageDefinition::new("clean_copy", StageParams::Copy)
            .with_input(DatasetRef::points("original_calls"))
            .with_output(DatasetRef::points("calls"));

        CopyExecutor.execute(&stage, &store).await.unwrap();
        assert!(stub.dataset("calls").is_some());
    }

    #[tokio::test]
    async fn test_integrate_forwards_tolerance() {
        let params = IntegrateParams {
            tolerance: LinearDistance::feet(45.0),
        };
        let mut engine = MockGeoEngine::new();
        engine
            .expect_integrate()
            .with(
                eq(Workspace::new("ws.gdb")),
                eq(DatasetRef::points("calls")),
                eq(params.clone()),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let store = FeatureStore::new(Arc::new(engine), Workspace::new("ws.gdb"));
        let stage = StageDefinition::new("integrate", StageParams::Integrate(params))
            .with_input(DatasetRef::points("calls"))
            .with_output(DatasetRef::points("calls"));

        IntegrateExecutor.execute(&stage, &store).await.unwrap();
    }

    #[tokio::test]
    async fn test_aggregate_reports_count_field() {
        let stub = Arc::new(StubEngine::new().with_dataset(DatasetRef::points("calls")));
        let store = FeatureStore::new(stub.clone(), Workspace::new("ws.gdb"));

        let output = AggregateExecutor.execute(&collect_events(), &store).await.unwrap();
        assert_eq!(output.metadata["count_field"], "ICOUNT");
        assert!(stub.dataset("calls_count").unwrap().fields.contains_key("ICOUNT"));
    }

    #[tokio::test]
    async fn test_aggregate_count_field_mismatch() {
        let mut engine = MockGeoEngine::new();
        engine.expect_aggregate_to_points().times(1).returning(|_, _, _| {
            Ok(AggregateOutcome {
                count_field: "Join_Count".to_string(),
            })
        });
        let store = FeatureStore::new(Arc::new(engine), Workspace::new("ws.gdb"));

        let err = AggregateExecutor.execute(&collect_events(), &store).await.unwrap_err();
        assert!(matches!(err, StoreError::Engine(EngineError::Operation { .. })));
        assert!(err.to_string().contains("Join_Count"));
    }

    #[tokio::test]
    async fn test_params_mismatch_rejected() {
        let store = FeatureStore::new(Arc::new(StubEngine::new()), Workspace::new("ws.gdb"));
        let err = IntegrateExecutor.execute(&collect_events(), &store).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDefinition(_)));
    }
}
