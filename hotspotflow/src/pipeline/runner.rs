//! Sequential pipeline runner.
//!
//! A run is a cleanup phase followed by every stage in registry order. Each
//! stage moves `Pending -> Running -> Succeeded | Failed`; the first failure
//! halts the run and later stages stay `Pending`.

use super::registry::{StageDefinition, StageRegistry};
use crate::core::{Operation, RunArtifact, RunReport, RunStatus, StageReport, StageStatus};
use crate::errors::{PipelineError, RegistryValidationError};
use crate::events::{EventSink, NoOpEventSink, RunEvent, RunEventKind};
use crate::stages::{executor_for, StageOutput};
use crate::store::{FeatureStore, StoreError};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Pseudo-stage name errors of the cleanup phase are attributed to.
pub const CLEANUP_STAGE: &str = "cleanup";

/// Executes a [`StageRegistry`] against a [`FeatureStore`].
///
/// Runs are not safe to overlap on one workspace; the runner does not lock.
#[derive(Clone)]
pub struct PipelineRunner {
    registry: StageRegistry,
    store: FeatureStore,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("pipeline", &self.registry.name())
            .field("stages", &self.registry.len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner that discards events.
    #[must_use]
    pub fn new(registry: StageRegistry, store: FeatureStore) -> Self {
        Self {
            registry,
            store,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Deletes every cleanup target, then verifies none survived.
    ///
    /// Returns the names that were actually present and deleted.
    pub async fn cleanup(&self) -> Result<Vec<String>, PipelineError> {
        let cleanup_error = |e| PipelineError::engine(CLEANUP_STAGE, Operation::Delete, e);
        let targets = self.registry.cleanup_targets();

        let mut deleted = Vec::new();
        for target in &targets {
            if self.store.delete(target).await.map_err(cleanup_error)? {
                deleted.push(target.name.clone());
            }
        }

        for target in &targets {
            if self.store.exists(target).await.map_err(cleanup_error)? {
                warn!(dataset = %target.name, "Dataset survived cleanup");
                return Err(PipelineError::post_condition(
                    CLEANUP_STAGE,
                    Operation::Delete,
                    target.clone(),
                ));
            }
        }

        info!(targets = targets.len(), deleted = deleted.len(), "Cleanup completed");
        Ok(deleted)
    }

    /// Runs cleanup and then every stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageFailed`] carrying the partial report and
    /// the cause when cleanup or any stage fails.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let stages = self
            .registry
            .stages()
            .iter()
            .map(|s| {
                StageReport::pending(
                    &s.name,
                    s.operation(),
                    s.params_digest(),
                    s.outputs.iter().map(|d| d.name.clone()).collect(),
                )
            })
            .collect();
        let report = RunReport::new(self.registry.name(), self.store.workspace().to_string(), stages);

        let span = info_span!(
            "pipeline",
            name = %self.registry.name(),
            run_id = %report.run_id,
            workspace = %self.store.workspace(),
        );
        self.run_inner(report).instrument(span).await
    }

    async fn run_inner(&self, mut report: RunReport) -> Result<RunReport, PipelineError> {
        info!(stages = self.registry.len(), "Pipeline started");
        let run_id = report.run_id;
        self.event_sink
            .emit(RunEvent::new(RunEventKind::PipelineStarted, run_id).with_data(json!({
                "pipeline": report.pipeline,
                "workspace": report.workspace,
                "stages": self.registry.len(),
            })))
            .await;

        match self.cleanup().await {
            Ok(cleaned) => report.cleaned = cleaned,
            Err(err) => return Err(self.halt(report, err).await),
        }
        self.event_sink
            .emit(
                RunEvent::new(RunEventKind::CleanupCompleted, run_id)
                    .with_data(json!({ "deleted": report.cleaned })),
            )
            .await;

        for (index, stage) in self.registry.stages().iter().enumerate() {
            match self.run_stage(run_id, stage, &mut report.stages[index]).await {
                Ok(output) => record_artifacts(&mut report, stage, &output),
                Err(err) => return Err(self.halt(report, err).await),
            }
        }

        report.finish(RunStatus::Succeeded);
        info!(artifacts = report.artifacts.len(), "Pipeline completed");
        self.event_sink
            .emit(
                RunEvent::new(RunEventKind::PipelineCompleted, run_id)
                    .with_data(json!({ "artifacts": report.artifact_names() })),
            )
            .await;
        Ok(report)
    }

    async fn halt(&self, mut report: RunReport, cause: PipelineError) -> PipelineError {
        report.finish(RunStatus::Failed);
        error!(
            stage = cause.stage().unwrap_or("-"),
            condition = cause.condition(),
            error = %cause,
            "Pipeline halted"
        );
        let mut event = RunEvent::new(RunEventKind::PipelineFailed, report.run_id).with_data(json!({
            "condition": cause.condition(),
            "error": cause.to_string(),
        }));
        event.stage = cause.stage().map(str::to_string);
        self.event_sink.emit(event).await;
        PipelineError::StageFailed {
            report: Box::new(report),
            cause: Box::new(cause),
        }
    }

    async fn run_stage(
        &self,
        run_id: Uuid,
        stage: &StageDefinition,
        entry: &mut StageReport,
    ) -> Result<StageOutput, PipelineError> {
        let span = info_span!("stage", name = %stage.name, operation = %stage.operation());
        let result = self.try_stage(run_id, stage, entry).instrument(span).await;

        match &result {
            Ok(_) => {
                transition(entry, StageStatus::Succeeded);
                info!(stage = %stage.name, duration_ms = entry.duration_ms, "Stage completed");
                self.event_sink
                    .emit(
                        RunEvent::new(RunEventKind::StageCompleted, run_id)
                            .for_stage(&stage.name, stage.operation())
                            .with_data(json!({
                                "duration_ms": entry.duration_ms,
                                "outputs": entry.outputs,
                            })),
                    )
                    .await;
            }
            Err(err) => {
                transition(entry, StageStatus::Failed);
                entry.error = Some(err.to_string());
                warn!(stage = %stage.name, condition = err.condition(), "Stage failed");
                self.event_sink
                    .emit(
                        RunEvent::new(RunEventKind::StageFailed, run_id)
                            .for_stage(&stage.name, stage.operation())
                            .with_data(json!({
                                "condition": err.condition(),
                                "error": err.to_string(),
                            })),
                    )
                    .await;
            }
        }
        result
    }

    async fn try_stage(
        &self,
        run_id: Uuid,
        stage: &StageDefinition,
        entry: &mut StageReport,
    ) -> Result<StageOutput, PipelineError> {
        let operation = stage.operation();

        let missing = self
            .store
            .first_missing(&stage.inputs)
            .await
            .map_err(|e| PipelineError::engine(&stage.name, operation, e))?;
        if let Some(dataset) = missing {
            return Err(PipelineError::missing_input(&stage.name, operation, dataset.clone()));
        }

        transition(entry, StageStatus::Running);
        self.event_sink
            .emit(
                RunEvent::new(RunEventKind::StageStarted, run_id)
                    .for_stage(&stage.name, operation)
                    .with_data(json!({
                        "inputs": stage.inputs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                    })),
            )
            .await;

        let started = Instant::now();
        let result = executor_for(&stage.params).execute(stage, &self.store).await;
        entry.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
        let output = result.map_err(|e| stage_error(stage, e))?;

        for dataset in stage.persisted_outputs() {
            let exists = self
                .store
                .exists(dataset)
                .await
                .map_err(|e| PipelineError::engine(&stage.name, operation, e))?;
            if !exists {
                return Err(PipelineError::post_condition(&stage.name, operation, dataset.clone()));
            }
        }

        debug!(outputs = stage.outputs.len(), "Outputs verified");
        Ok(output)
    }
}

fn transition(entry: &mut StageReport, next: StageStatus) {
    debug_assert!(
        entry.status.can_transition_to(next),
        "illegal transition {} -> {next} for stage '{}'",
        entry.status,
        entry.name
    );
    entry.status = next;
}

fn stage_error(stage: &StageDefinition, err: StoreError) -> PipelineError {
    let operation = stage.operation();
    match err {
        StoreError::NotFound(dataset) => PipelineError::missing_input(&stage.name, operation, dataset),
        StoreError::Engine(source) => PipelineError::engine(&stage.name, operation, source),
        StoreError::InvalidDefinition(message) => PipelineError::Validation(
            RegistryValidationError::new("REGISTRY-ARITY", message).with_stages(vec![stage.name.clone()]),
        ),
    }
}

fn record_artifacts(report: &mut RunReport, stage: &StageDefinition, output: &StageOutput) {
    for dataset in &stage.outputs {
        let mut artifact = RunArtifact::new(&dataset.name, dataset.kind, &stage.name)
            .with_data(output.get(&dataset.name).cloned().unwrap_or_default());
        for (key, value) in &output.metadata {
            artifact = artifact.with_metadata(key.clone(), value.clone());
        }
        // An in-place update supersedes the earlier record of the same dataset.
        match report.artifacts.iter_mut().find(|a| a.name == dataset.name) {
            Some(existing) => *existing = artifact,
            None => report.artifacts.push(artifact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::core::{DatasetRef, Workspace};
    use crate::events::CollectingEventSink;
    use crate::testing::StubEngine;

    fn runner_with(stub: &Arc<StubEngine>) -> PipelineRunner {
        let config = PipelineConfig::default();
        let registry = StageRegistry::reference(&config).unwrap();
        PipelineRunner::new(registry, FeatureStore::new(stub.clone(), Workspace::new("ws.gdb")))
    }

    #[tokio::test]
    async fn test_cleanup_deletes_present_targets() {
        let stub = Arc::new(
            StubEngine::seeded_for(&PipelineConfig::default())
                .with_dataset(DatasetRef::points("calls"))
                .with_dataset(DatasetRef::features("gwr_911_calls")),
        );

        let deleted = runner_with(&stub).cleanup().await.unwrap();
        assert_eq!(deleted, vec!["calls".to_string(), "gwr_911_calls".to_string()]);
        assert_eq!(stub.calls_for("delete"), 2);
        assert!(stub.dataset("original_calls").is_some());
    }

    #[tokio::test]
    async fn test_cleanup_survivor_is_violation() {
        let stub = Arc::new(StubEngine::new().with_dataset(DatasetRef::points("calls_count")));
        stub.skip_outputs("delete");

        let err = runner_with(&stub).cleanup().await.unwrap_err();
        match err {
            PipelineError::PostConditionViolation { stage, operation, dataset } => {
                assert_eq!(stage, CLEANUP_STAGE);
                assert_eq!(operation, Operation::Delete);
                assert_eq!(dataset.name, "calls_count");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_halts_before_stages() {
        let stub = Arc::new(
            StubEngine::seeded_for(&PipelineConfig::default()).with_dataset(DatasetRef::points("calls")),
        );
        stub.fail_on("delete", "dataset locked");
        let sink = Arc::new(CollectingEventSink::new());

        let err = runner_with(&stub)
            .with_event_sink(sink.clone())
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(CLEANUP_STAGE));
        let report = err.report().unwrap();
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert!(stub.analytic_calls().is_empty());
        assert_eq!(
            sink.kinds(),
            vec![RunEventKind::PipelineStarted, RunEventKind::PipelineFailed]
        );
        assert_eq!(
            sink.of_kind(RunEventKind::PipelineFailed)[0].stage.as_deref(),
            Some(CLEANUP_STAGE)
        );
    }

    #[tokio::test]
    async fn test_stage_events_in_order() {
        let stub = Arc::new(StubEngine::seeded_for(&PipelineConfig::default()));
        let sink = Arc::new(CollectingEventSink::new());

        runner_with(&stub).with_event_sink(sink.clone()).run().await.unwrap();

        let kinds = sink.kinds();
        assert_eq!(kinds.first(), Some(&RunEventKind::PipelineStarted));
        assert_eq!(kinds[1], RunEventKind::CleanupCompleted);
        assert_eq!(kinds.last(), Some(&RunEventKind::PipelineCompleted));
        assert_eq!(sink.of_kind(RunEventKind::StageStarted).len(), 8);
        assert_eq!(sink.of_kind(RunEventKind::StageCompleted).len(), 8);
        assert!(sink.of_kind(RunEventKind::StageFailed).is_empty());

        let hotspot: Vec<RunEventKind> = sink.for_stage("hotspot").iter().map(|e| e.kind).collect();
        assert_eq!(hotspot, vec![RunEventKind::StageStarted, RunEventKind::StageCompleted]);
        let run_ids: std::collections::HashSet<Uuid> = sink.events().iter().map(|e| e.run_id).collect();
        assert_eq!(run_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_report_records_digests_and_durations() {
        let stub = Arc::new(StubEngine::seeded_for(&PipelineConfig::default()));
        let runner = runner_with(&stub);

        let report = runner.run().await.unwrap();
        for (entry, stage) in report.stages.iter().zip(runner.registry().stages()) {
            assert_eq!(entry.params_digest, stage.params_digest());
            assert!(entry.duration_ms.is_some());
            assert!(entry.error.is_none());
        }
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_in_place_output_recorded_once() {
        let stub = Arc::new(StubEngine::seeded_for(&PipelineConfig::default()));

        let report = runner_with(&stub).run().await.unwrap();

        let calls: Vec<&RunArtifact> = report.artifacts.iter().filter(|a| a.name == "calls").collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stage, "integrate");
        assert_eq!(report.artifact_names()[0], "calls");
        assert_eq!(report.artifacts.len(), 9);
    }

    #[tokio::test]
    async fn test_engine_failure_marks_stage() {
        let stub = Arc::new(StubEngine::seeded_for(&PipelineConfig::default()));
        stub.fail_on("hotspot_analysis", "field ICOUNT not found");

        let err = runner_with(&stub).run().await.unwrap_err();
        assert!(matches!(err.root(), PipelineError::EngineOperation { .. }));

        let report = err.report().unwrap();
        let hotspot = report.stage("hotspot").unwrap();
        assert_eq!(hotspot.status, StageStatus::Failed);
        assert!(hotspot.error.as_deref().unwrap().contains("field ICOUNT not found"));
        assert!(hotspot.duration_ms.is_some());
        assert_eq!(report.stage_status("interpolate"), Some(StageStatus::Pending));
        assert_eq!(report.status, Some(RunStatus::Failed));
    }
}
