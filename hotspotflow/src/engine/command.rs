//! Engine bridge that runs an external program per operation.
//!
//! Each call spawns `program [args..] <operation>`, writes one JSON request on
//! stdin and reads one JSON response from stdout:
//!
//! ```text
//! -> {"workspace": "...", "operation": "hotspot_analysis", "payload": {...}}
//! <- {"ok": true, "result": ...}
//! <- {"ok": false, "error": "field ICOUNT not found"}
//! ```

use super::{
    AggregateOutcome, AutocorrelationReport, GeoEngine, OlsOutputs, RasterSurface,
};
use crate::core::{DatasetRef, Workspace};
use crate::errors::EngineError;
use crate::params::{
    AutocorrelationParams, GwrParams, HotspotParams, IntegrateParams, InterpolateParams, OlsParams,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct EngineRequest<'a> {
    workspace: &'a Path,
    operation: &'a str,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// A [`GeoEngine`] backed by an external executable.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    /// Creates a bridge to `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Sets leading arguments passed before the operation keyword.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        workspace: &Workspace,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<T, EngineError> {
        let request = EngineRequest {
            workspace: workspace.location(),
            operation,
            payload,
        };
        let body = serde_json::to_vec(&request)?;

        debug!(program = %self.program.display(), operation, "Invoking engine");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin while draining stdout, so neither pipe can fill up and stall the other.
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&body).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(operation, code = ?output.status.code(), "Engine process failed");
            return Err(EngineError::Process {
                program: self.program.display().to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        match written {
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(operation, "Engine closed stdin before reading the full request");
            }
            other => other?,
        }

        let response: EngineResponse = serde_json::from_slice(&output.stdout)?;
        if !response.ok {
            return Err(EngineError::operation(
                operation,
                response
                    .error
                    .unwrap_or_else(|| "engine reported failure without a message".to_string()),
            ));
        }

        Ok(serde_json::from_value(response.result)?)
    }
}

#[async_trait]
impl GeoEngine for CommandEngine {
    async fn exists(&self, workspace: &Workspace, dataset: &DatasetRef) -> Result<bool, EngineError> {
        self.call(workspace, "exists", serde_json::json!({ "dataset": dataset }))
            .await
    }

    async fn delete(&self, workspace: &Workspace, dataset: &DatasetRef) -> Result<(), EngineError> {
        self.call(workspace, "delete", serde_json::json!({ "dataset": dataset }))
            .await
    }

    async fn copy(
        &self,
        workspace: &Workspace,
        source: &DatasetRef,
        dest: &DatasetRef,
    ) -> Result<(), EngineError> {
        self.call(
            workspace,
            "copy",
            serde_json::json!({ "source": source, "dest": dest }),
        )
        .await
    }

    async fn integrate(
        &self,
        workspace: &Workspace,
        dataset: &DatasetRef,
        params: &IntegrateParams,
    ) -> Result<(), EngineError> {
        self.call(
            workspace,
            "integrate",
            serde_json::json!({ "dataset": dataset, "params": params }),
        )
        .await
    }

    async fn aggregate_to_points(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
    ) -> Result<AggregateOutcome, EngineError> {
        self.call(
            workspace,
            "aggregate_to_points",
            serde_json::json!({ "input": input, "output": output }),
        )
        .await
    }

    async fn hotspot_analysis(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
        params: &HotspotParams,
    ) -> Result<(), EngineError> {
        self.call(
            workspace,
            "hotspot_analysis",
            serde_json::json!({ "input": input, "output": output, "params": params }),
        )
        .await
    }

    async fn interpolate(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        params: &InterpolateParams,
    ) -> Result<RasterSurface, EngineError> {
        self.call(
            workspace,
            "interpolate",
            serde_json::json!({ "input": input, "params": params }),
        )
        .await
    }

    async fn save_raster(
        &self,
        workspace: &Workspace,
        raster: &RasterSurface,
        dest: &DatasetRef,
    ) -> Result<(), EngineError> {
        self.call(
            workspace,
            "save_raster",
            serde_json::json!({ "raster": raster, "dest": dest }),
        )
        .await
    }

    async fn ordinary_least_squares(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        outputs: &OlsOutputs,
        params: &OlsParams,
    ) -> Result<(), EngineError> {
        self.call(
            workspace,
            "ordinary_least_squares",
            serde_json::json!({ "input": input, "outputs": outputs, "params": params }),
        )
        .await
    }

    async fn spatial_autocorrelation(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        params: &AutocorrelationParams,
    ) -> Result<AutocorrelationReport, EngineError> {
        self.call(
            workspace,
            "spatial_autocorrelation",
            serde_json::json!({ "input": input, "params": params }),
        )
        .await
    }

    async fn geographically_weighted_regression(
        &self,
        workspace: &Workspace,
        input: &DatasetRef,
        output: &DatasetRef,
        params: &GwrParams,
    ) -> Result<(), EngineError> {
        self.call(
            workspace,
            "geographically_weighted_regression",
            serde_json::json!({ "input": input, "output": output, "params": params }),
        )
        .await
    }
}
