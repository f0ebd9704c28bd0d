//! Request and response bodies of the Run Tracking Service.
//!
//! The service is not always consistent about its response shape: some
//! deployments wrap payloads in `{ "data": ... }` and name the run id
//! `run_exe_id`. [`ApiEnvelope`] and serde aliases absorb both shapes.

use crate::log_models::{LogLevel, LogLine};
use crate::run_models::{ExecutionMode, RunConfiguration};
use crate::stage_models::{StageId, StageStatus};
use serde::{Deserialize, Serialize};

/// Response payload that may or may not be wrapped in a `data` field.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ApiEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiEnvelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            ApiEnvelope::Wrapped { data } => data,
            ApiEnvelope::Bare(inner) => inner,
        }
    }
}

/// Body of `POST /runs/start`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StartRunRequest {
    pub source_system: String,
    pub snapshot_date: String,
    pub methodology: String,
    pub scope: Vec<String>,
    pub execution_mode: ExecutionMode,
}

impl StartRunRequest {
    pub fn new(config: &RunConfiguration, mode: ExecutionMode) -> Self {
        Self {
            source_system: config.source_system.clone(),
            snapshot_date: config.snapshot_date.clone(),
            methodology: config
                .methodology
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            scope: config.scope_labels(),
            execution_mode: mode,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StartRunResponse {
    #[serde(alias = "run_exe_id")]
    pub run_id: String,
}

/// Response of `GET /runs/{runId}/execution`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDetails {
    pub steps: Vec<StepRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step_id: StageId,
    pub step_name: String,
    #[serde(default = "default_step_status")]
    pub status: StageStatus,
    #[serde(default)]
    pub dag_id: Option<String>,
}

fn default_step_status() -> StageStatus {
    StageStatus::Pending
}

/// Body of `PUT /runs/{runId}/steps/{stepId}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepStatusUpdate {
    pub status: StageStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepLogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl From<&LogLine> for StepLogEntry {
    fn from(line: &LogLine) -> Self {
        Self {
            level: line.level,
            message: line.message.clone(),
        }
    }
}

/// Body of `POST /runs/{runId}/steps/{stepId}/logs`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepLogBatch {
    pub logs: Vec<StepLogEntry>,
}

/// Body of `PUT /runs/{runId}/complete`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CompleteRunRequest {
    pub status: String,
    pub total_records: u64,
    pub summary: String,
}

/// Error body returned with non-2xx responses.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
