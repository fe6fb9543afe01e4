//! Command-line entry point.
//!
//! Runs the reference hotspot pipeline against an external engine executable.
//! Two runs must not target the same workspace at once; nothing here locks it.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hotspotflow::config::PipelineConfig;
use hotspotflow::core::RunReport;
use hotspotflow::engine::CommandEngine;
use hotspotflow::errors::PipelineError;
use hotspotflow::events::LoggingEventSink;
use hotspotflow::pipeline::{PipelineRunner, StageRegistry};
use hotspotflow::store::FeatureStore;
use hotspotflow::telemetry::{init_tracing, LogFormat};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Clean up prior artifacts and run every stage.
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the run report as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the validated stage plan and cleanup targets.
    Plan {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Debug, Args)]
struct PipelineArgs {
    /// Pipeline configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the workspace location.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Override the transient name prefix.
    #[arg(long)]
    prefix: Option<String>,
}

impl PipelineArgs {
    fn load(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(workspace) = &self.workspace {
            config = config.with_workspace(workspace);
        }
        if let Some(prefix) = &self.prefix {
            config = config.with_prefix(prefix);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_format, "hotspotflow=info") {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Command::Run { pipeline, report } => run(&pipeline, report.as_deref()).await,
        Command::Plan { pipeline } => plan(&pipeline),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_failure(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &PipelineArgs, report_path: Option<&Path>) -> Result<()> {
    let config = args.load()?;
    let registry = StageRegistry::reference(&config)?;
    let Some(program) = &config.engine.program else {
        bail!("no engine program configured; set [engine] program");
    };
    let engine = CommandEngine::new(program).with_args(config.engine.args.iter().cloned());
    let store = FeatureStore::new(Arc::new(engine), config.workspace());
    let runner = PipelineRunner::new(registry, store).with_event_sink(Arc::new(LoggingEventSink::default()));

    match runner.run().await {
        Ok(report) => {
            write_report(report_path, &report)?;
            println!(
                "pipeline '{}' succeeded: {} stages, {} artifacts",
                report.pipeline,
                report.stages.len(),
                report.artifacts.len()
            );
            Ok(())
        }
        Err(err) => {
            if let Some(report) = err.report() {
                write_report(report_path, report)?;
            }
            Err(err.into())
        }
    }
}

fn plan(args: &PipelineArgs) -> Result<()> {
    let config = args.load()?;
    let registry = StageRegistry::reference(&config)?;

    println!("pipeline '{}' in {}", registry.name(), config.workspace());
    println!("sources:");
    for source in registry.sources() {
        println!("  {} ({})", source.name, source.kind);
    }
    println!("cleanup:");
    for target in registry.cleanup_targets() {
        println!("  {}", target.name);
    }
    println!("stages:");
    for (i, stage) in registry.stages().iter().enumerate() {
        let names = |datasets: &[hotspotflow::core::DatasetRef]| {
            datasets.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
        };
        println!(
            "  {}. {} [{}] {} -> {}",
            i + 1,
            stage.name,
            stage.operation(),
            names(&stage.inputs),
            names(&stage.outputs)
        );
    }
    Ok(())
}

fn write_report(path: Option<&Path>, report: &RunReport) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("failed to write report to {}", path.display()))
}

fn print_failure(err: &anyhow::Error) {
    match err.downcast_ref::<PipelineError>() {
        Some(pipeline_err) if pipeline_err.stage().is_some() => {
            let root = pipeline_err.root();
            error!(
                stage = pipeline_err.stage().unwrap_or_default(),
                condition = root.condition(),
                "Pipeline failed"
            );
            eprintln!("error: {root}");
            eprintln!("  stage:     {}", pipeline_err.stage().unwrap_or_default());
            if let Some(operation) = operation_of(root) {
                eprintln!("  operation: {operation}");
            }
            eprintln!("  condition: {}", root.condition());
        }
        _ => eprintln!("error: {err:#}"),
    }
}

fn operation_of(err: &PipelineError) -> Option<String> {
    match err {
        PipelineError::MissingInput { operation, .. }
        | PipelineError::EngineOperation { operation, .. }
        | PipelineError::PostConditionViolation { operation, .. } => Some(operation.to_string()),
        _ => None,
    }
}
