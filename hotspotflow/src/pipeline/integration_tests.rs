//! End-to-end runs of the reference pipeline.

use super::{PipelineRunner, StageRegistry};
use crate::config::PipelineConfig;
use crate::core::{DatasetKind, DatasetRef, Operation, StageStatus, Workspace};
use crate::engine::{AggregateOutcome, AutocorrelationReport, MockGeoEngine, RasterSurface};
use crate::errors::PipelineError;
use crate::params::{BandwidthMethod, LinearDistance, SpatialRelation};
use crate::store::FeatureStore;
use crate::testing::{
    assert_run_failed_at, assert_run_succeeded, assert_stage_statuses, EngineCall, StubEngine,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;

const WORKSPACE: &str = "./final_project.gdb";

fn runner(config: &PipelineConfig, engine: Arc<StubEngine>) -> PipelineRunner {
    let registry = StageRegistry::reference(config).unwrap();
    PipelineRunner::new(registry, FeatureStore::new(engine, Workspace::new(WORKSPACE)))
}

fn seeded(config: &PipelineConfig) -> Arc<StubEngine> {
    Arc::new(StubEngine::seeded_for(config))
}

fn operations(calls: &[EngineCall]) -> Vec<&str> {
    calls.iter().map(|c| c.operation.as_str()).collect()
}

#[tokio::test]
async fn test_full_run_produces_artifact_set() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);

    let report = runner(&config, stub.clone()).run().await.unwrap();

    assert_run_succeeded(&report);
    assert_eq!(
        report.succeeded_stages(),
        vec![
            "clean_copy",
            "integrate",
            "collect_events",
            "hotspot",
            "interpolate",
            "ols",
            "autocorrelation",
            "gwr",
        ]
    );
    assert_eq!(
        stub.names(),
        vec![
            "ObsData911Calls",
            "calls",
            "calls_count",
            "calls_hotspot",
            "gwr_911_calls",
            "obs_calls",
            "olsCoefTab.dbf",
            "olsDiagTab.dbf",
            "original_calls",
            "visualize_surface_calls",
        ]
    );
    assert_eq!(
        stub.dataset("visualize_surface_calls").unwrap().kind,
        DatasetKind::Raster
    );

    let autocorrelation = report
        .artifacts
        .iter()
        .find(|a| a.name == "obs_calls_autocorrelation")
        .unwrap();
    assert!(autocorrelation.is_report());
    assert!(autocorrelation.data["z_score"].is_number());
    assert!(stub.dataset("obs_calls_autocorrelation").is_none());
    assert_eq!(
        report.artifact_names(),
        vec![
            "calls",
            "calls_count",
            "calls_hotspot",
            "visualize_surface_calls",
            "obs_calls",
            "olsCoefTab.dbf",
            "olsDiagTab.dbf",
            "obs_calls_autocorrelation",
            "gwr_911_calls",
        ]
    );
}

#[tokio::test]
async fn test_engine_calls_are_sequential_and_scoped() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);

    runner(&config, stub.clone()).run().await.unwrap();

    let calls = stub.analytic_calls();
    assert_eq!(
        operations(&calls),
        vec![
            "copy",
            "integrate",
            "aggregate_to_points",
            "hotspot_analysis",
            "interpolate",
            "save_raster",
            "ordinary_least_squares",
            "spatial_autocorrelation",
            "geographically_weighted_regression",
        ]
    );
    assert!(stub
        .calls()
        .iter()
        .all(|c| c.workspace == Workspace::new(WORKSPACE)));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);
    let runner = runner(&config, stub.clone());

    let first = runner.run().await.unwrap();
    let after_first = stub.snapshot();
    let first_calls = stub.analytic_calls();
    stub.clear_calls();

    let second = runner.run().await.unwrap();

    assert_eq!(stub.snapshot(), after_first);
    assert_eq!(stub.analytic_calls(), first_calls);
    let digests = |r: &crate::core::RunReport| -> Vec<String> {
        r.stages.iter().map(|s| s.params_digest.clone()).collect()
    };
    assert_eq!(digests(&first), digests(&second));
    assert_eq!(first.artifact_names(), second.artifact_names());
    assert_ne!(first.run_id, second.run_id);
    assert!(first.cleaned.is_empty());
    assert_eq!(second.cleaned.len(), 8);
}

/// A catalog holding stale versions of most artifacts from an earlier run.
fn stale(config: &PipelineConfig) -> Arc<StubEngine> {
    Arc::new(
        StubEngine::seeded_for(config)
            .with_dataset(DatasetRef::points("calls"))
            .with_dataset(DatasetRef::points("calls_count"))
            .with_dataset(DatasetRef::features("calls_hotspot"))
            .with_dataset(DatasetRef::raster("visualize_surface_calls"))
            .with_dataset(DatasetRef::features("obs_calls"))
            .with_dataset(DatasetRef::table("olsCoefTab.dbf"))
            .with_dataset(DatasetRef::features("gwr_911_calls"))
            .with_dataset(DatasetRef::features("calls_2019")),
    )
}

#[tokio::test]
async fn test_cleanup_removes_every_target() {
    let mut config = PipelineConfig::default();
    config.cleanup.extra = vec!["calls_2019".to_string()];
    let stub = stale(&config);
    let runner = runner(&config, stub.clone());

    let deleted = runner.cleanup().await.unwrap();

    assert_eq!(deleted.len(), 8);
    assert!(!deleted.contains(&"olsDiagTab.dbf".to_string()));
    assert_eq!(stub.names(), vec!["ObsData911Calls", "original_calls"]);
    for target in runner.registry().cleanup_targets() {
        assert!(stub.dataset(&target.name).is_none(), "{} survived", target.name);
    }
}

#[tokio::test]
async fn test_cleanup_precedes_first_stage() {
    let mut config = PipelineConfig::default();
    config.cleanup.extra = vec!["calls_2019".to_string()];
    let stub = stale(&config);

    let report = runner(&config, stub.clone()).run().await.unwrap();

    assert_eq!(report.cleaned.len(), 8);
    assert!(stub.dataset("calls_2019").is_none());
    let calls = stub.calls();
    let first_copy = calls.iter().position(|c| c.operation == "copy").unwrap();
    let last_delete = calls.iter().rposition(|c| c.operation == "delete").unwrap();
    assert!(last_delete < first_copy);
    // Sources are never cleanup targets.
    assert!(stub.dataset("ObsData911Calls").is_some());
}

#[tokio::test]
async fn test_missing_source_fails_fast() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);
    stub.withhold("original_calls");

    let err = runner(&config, stub.clone()).run().await.unwrap_err();

    let report = assert_run_failed_at(&err, "clean_copy");
    assert!(matches!(
        err.root(),
        PipelineError::MissingInput { dataset, operation: Operation::Copy, .. } if dataset.name == "original_calls"
    ));
    assert_eq!(err.condition(), "precondition: input exists");
    assert_stage_statuses(
        report,
        &[
            ("clean_copy", StageStatus::Failed),
            ("integrate", StageStatus::Pending),
            ("gwr", StageStatus::Pending),
        ],
    );
    assert!(stub.analytic_calls().is_empty());
}

#[tokio::test]
async fn test_covariates_absent_completes_hotspot_branch_only() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);
    stub.withhold("ObsData911Calls");

    let err = runner(&config, stub.clone()).run().await.unwrap_err();

    let report = assert_run_failed_at(&err, "ols");
    assert!(matches!(err.root(), PipelineError::MissingInput { .. }));
    assert_stage_statuses(
        report,
        &[
            ("clean_copy", StageStatus::Succeeded),
            ("integrate", StageStatus::Succeeded),
            ("collect_events", StageStatus::Succeeded),
            ("hotspot", StageStatus::Succeeded),
            ("interpolate", StageStatus::Succeeded),
            ("ols", StageStatus::Failed),
            ("autocorrelation", StageStatus::Pending),
            ("gwr", StageStatus::Pending),
        ],
    );
    assert!(stub.dataset("visualize_surface_calls").is_some());
    assert_eq!(stub.calls_for("ordinary_least_squares"), 0);
    assert_eq!(stub.calls_for("spatial_autocorrelation"), 0);
    assert_eq!(stub.calls_for("geographically_weighted_regression"), 0);
    assert_eq!(
        report.artifact_names(),
        vec!["calls", "calls_count", "calls_hotspot", "visualize_surface_calls"]
    );
}

#[tokio::test]
async fn test_rerun_after_failure_recovers() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);
    let runner = runner(&config, stub.clone());

    stub.withhold("ObsData911Calls");
    assert!(runner.run().await.is_err());

    stub.release("ObsData911Calls");
    let report = runner.run().await.unwrap();

    assert_run_succeeded(&report);
    assert_eq!(
        report.cleaned,
        vec!["calls", "calls_count", "calls_hotspot", "visualize_surface_calls"]
    );
}

#[tokio::test]
async fn test_unmaterialized_output_violates_postcondition() {
    let config = PipelineConfig::default();
    let stub = seeded(&config);
    stub.skip_outputs("hotspot_analysis");

    let err = runner(&config, stub.clone()).run().await.unwrap_err();

    let report = assert_run_failed_at(&err, "hotspot");
    match err.root() {
        PipelineError::PostConditionViolation { operation, dataset, .. } => {
            assert_eq!(*operation, Operation::HotspotAnalysis);
            assert_eq!(dataset.name, "calls_hotspot");
        }
        other => panic!("unexpected cause: {other:?}"),
    }
    assert_eq!(report.stage_status("interpolate"), Some(StageStatus::Pending));
    assert_eq!(stub.calls_for("interpolate"), 0);
}

#[tokio::test]
async fn test_renamed_count_field_reaches_hotspot() {
    let config = PipelineConfig::from_toml_str(
        r#"
        [stages.collect_events]
        count_field = "Join_Count"

        [stages.hotspot]
        input_field = "Join_Count"
        "#,
    )
    .unwrap();
    let stub = Arc::new(StubEngine::seeded_for(&config).with_count_field("Join_Count"));

    let report = runner(&config, stub.clone()).run().await.unwrap();

    assert_run_succeeded(&report);
    let hotspot = stub
        .analytic_calls()
        .into_iter()
        .find(|c| c.operation == "hotspot_analysis")
        .unwrap();
    assert_eq!(hotspot.params["input_field"], "Join_Count");
    assert!(stub.dataset("calls_count").unwrap().fields.contains_key("Join_Count"));
}

#[tokio::test]
async fn test_count_field_mismatch_halts_before_hotspot() {
    let config = PipelineConfig::default();
    let stub = Arc::new(StubEngine::seeded_for(&config).with_count_field("Join_Count"));

    let err = runner(&config, stub.clone()).run().await.unwrap_err();

    assert_run_failed_at(&err, "collect_events");
    assert!(matches!(err.root(), PipelineError::EngineOperation { .. }));
    assert!(err.to_string().contains("Join_Count"));
    assert_eq!(stub.calls_for("hotspot_analysis"), 0);
}

#[tokio::test]
async fn test_engine_receives_configured_params() {
    let mut config = PipelineConfig::default();
    config.stages.integrate.tolerance = LinearDistance::feet(45.0);
    config.stages.hotspot.distance_threshold = 2000.0;
    config.stages.autocorrelation.conceptualization = SpatialRelation::FixedDistanceBand;
    config.stages.gwr.bandwidth = BandwidthMethod::CrossValidation;
    let stub = seeded(&config);

    runner(&config, stub.clone()).run().await.unwrap();

    let params_of = |operation: &str| -> serde_json::Value {
        stub.analytic_calls()
            .into_iter()
            .find(|c| c.operation == operation)
            .map(|c| c.params)
            .unwrap()
    };
    assert_eq!(params_of("integrate"), serde_json::to_value(&config.stages.integrate).unwrap());
    assert_eq!(params_of("integrate")["tolerance"], "45 feet");
    assert_eq!(params_of("hotspot_analysis"), serde_json::to_value(&config.stages.hotspot).unwrap());
    assert_eq!(params_of("interpolate"), serde_json::to_value(&config.stages.interpolate).unwrap());
    assert_eq!(params_of("ordinary_least_squares"), serde_json::to_value(&config.stages.ols).unwrap());
    assert_eq!(
        params_of("spatial_autocorrelation")["conceptualization"],
        "FIXED_DISTANCE_BAND"
    );
    assert_eq!(params_of("geographically_weighted_regression")["bandwidth"], "CV");
}

/// A mock whose catalog queries are backed by a shared set of names.
fn catalog_mock(config: &PipelineConfig) -> MockGeoEngine {
    let catalog = Arc::new(Mutex::new(HashSet::from([
        config.datasets.incidents.clone(),
        config.datasets.covariates.clone(),
    ])));
    let stages = config.stages.clone();
    let mut engine = MockGeoEngine::new();

    let c = catalog.clone();
    engine
        .expect_exists()
        .returning(move |_, d| Ok(c.lock().contains(&d.name)));
    let c = catalog.clone();
    engine.expect_delete().returning(move |_, d| {
        c.lock().remove(&d.name);
        Ok(())
    });
    let c = catalog.clone();
    engine.expect_copy().times(1).returning(move |_, _, dest| {
        c.lock().insert(dest.name.clone());
        Ok(())
    });

    let expected = stages.integrate.clone();
    engine
        .expect_integrate()
        .withf(move |_, d, p| d.name == "calls" && *p == expected)
        .times(1)
        .returning(|_, _, _| Ok(()));

    let c = catalog.clone();
    engine
        .expect_aggregate_to_points()
        .times(1)
        .returning(move |_, _, output| {
            c.lock().insert(output.name.clone());
            Ok(AggregateOutcome {
                count_field: "ICOUNT".to_string(),
            })
        });

    let expected = stages.hotspot.clone();
    let c = catalog.clone();
    engine
        .expect_hotspot_analysis()
        .withf(move |_, _, _, p| *p == expected)
        .times(1)
        .returning(move |_, _, output, _| {
            c.lock().insert(output.name.clone());
            Ok(())
        });

    let expected = stages.interpolate.clone();
    engine
        .expect_interpolate()
        .withf(move |_, _, p| *p == expected)
        .times(1)
        .returning(|_, input, p| {
            Ok(RasterSurface {
                handle: "mem://surface".to_string(),
                source: input.name.clone(),
                value_field: p.value_field.clone(),
            })
        });
    let c = catalog.clone();
    engine.expect_save_raster().times(1).returning(move |_, _, dest| {
        c.lock().insert(dest.name.clone());
        Ok(())
    });

    let expected = stages.ols.clone();
    let c = catalog.clone();
    engine
        .expect_ordinary_least_squares()
        .withf(move |_, _, _, p| *p == expected)
        .times(1)
        .returning(move |_, _, outputs, _| {
            let mut catalog = c.lock();
            catalog.insert(outputs.features.name.clone());
            catalog.insert(outputs.coefficients.name.clone());
            catalog.insert(outputs.diagnostics.name.clone());
            Ok(())
        });

    let expected = stages.autocorrelation.clone();
    engine
        .expect_spatial_autocorrelation()
        .withf(move |_, _, p| *p == expected)
        .times(1)
        .returning(|_, _, _| {
            Ok(AutocorrelationReport {
                morans_index: 0.05,
                expected_index: -0.001,
                variance: 0.0002,
                z_score: 1.2,
                p_value: 0.23,
                report_file: None,
            })
        });

    let expected = stages.gwr.clone();
    let c = catalog;
    engine
        .expect_geographically_weighted_regression()
        .withf(move |_, _, _, p| *p == expected)
        .times(1)
        .returning(move |_, _, output, _| {
            c.lock().insert(output.name.clone());
            Ok(())
        });

    engine
}

#[tokio::test]
async fn test_mock_engine_receives_exact_bundles() {
    let mut config = PipelineConfig::default();
    config.stages.hotspot.distance_threshold = 1750.0;
    config.stages.ols.explanatory_fields = vec!["Pop".to_string(), "Jobs".to_string()];
    let registry = StageRegistry::reference(&config).unwrap();
    let store = FeatureStore::new(Arc::new(catalog_mock(&config)), Workspace::new(WORKSPACE));

    let report = PipelineRunner::new(registry, store).run().await.unwrap();

    assert_run_succeeded(&report);
    let autocorrelation = report
        .artifacts
        .iter()
        .find(|a| a.name == "obs_calls_autocorrelation")
        .unwrap();
    assert_eq!(autocorrelation.metadata["clustered"], serde_json::json!(false));
}

#[tokio::test]
async fn test_prefixed_run_renames_transient_only() {
    let config = PipelineConfig::default().with_prefix("_");
    let stub = seeded(&config);

    runner(&config, stub.clone()).run().await.unwrap();

    let names = stub.names();
    assert!(names.contains(&"original_calls".to_string()));
    assert!(names.contains(&"ObsData911Calls".to_string()));
    let transient: Vec<&String> = names
        .iter()
        .filter(|n| n.as_str() != "original_calls" && n.as_str() != "ObsData911Calls")
        .collect();
    assert_eq!(transient.len(), 8);
    assert!(transient.iter().all(|n| n.starts_with('_')));
    assert!(stub.dataset("calls").is_none());

    let gwr = stub
        .analytic_calls()
        .into_iter()
        .find(|c| c.operation == "geographically_weighted_regression")
        .unwrap();
    assert_eq!(gwr.datasets, vec!["ObsData911Calls", "_gwr_911_calls"]);
}

#[tokio::test]
async fn test_prefixed_and_plain_runs_share_workspace() {
    let plain = PipelineConfig::default();
    let prefixed = PipelineConfig::default().with_prefix("_");
    let stub = seeded(&plain);

    runner(&plain, stub.clone()).run().await.unwrap();
    runner(&prefixed, stub.clone()).run().await.unwrap();

    assert!(stub.dataset("calls_hotspot").is_some());
    assert!(stub.dataset("_calls_hotspot").is_some());
    assert_eq!(
        stub.dataset("calls_hotspot").map(|d| d.content),
        stub.dataset("_calls_hotspot").map(|d| d.content)
    );
}
