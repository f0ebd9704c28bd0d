//! Collaborator traits and supporting types.

use async_trait::async_trait;
use bytes::Bytes;
use er_protocol::api_models::{CompleteRunRequest, ExecutionDetails, StartRunRequest, StepLogEntry};
use er_protocol::stage_models::{StageId, StageStatus};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Raw body of a job's output stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The service answered with a non-2xx status.
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },
    /// The request never produced a response, or the body broke mid-read.
    #[error("{0}")]
    Transport(String),
    /// The response body was not the expected JSON.
    #[error("Malformed response: {0}")]
    Decode(String),
    /// The response parsed but violates an expectation.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether repeating the same call could succeed.
    ///
    /// Client errors other than 408 and 429 are final.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            ApiError::Transport(_) => true,
            ApiError::Decode(_) | ApiError::InvalidResponse(_) => false,
        }
    }
}

/// The Run Tracking Service: owns run and step records.
#[async_trait]
pub trait RunTracker: Send + Sync {
    /// Registers a new run and returns its identifier.
    async fn start_run(&self, request: &StartRunRequest) -> Result<String, ApiError>;

    /// Stage list of a run.
    async fn execution_details(&self, run_id: &str) -> Result<ExecutionDetails, ApiError>;

    async fn update_step_status(
        &self,
        run_id: &str,
        step_id: StageId,
        status: StageStatus,
    ) -> Result<(), ApiError>;

    async fn save_logs(
        &self,
        run_id: &str,
        step_id: StageId,
        logs: &[StepLogEntry],
    ) -> Result<(), ApiError>;

    async fn retry_step(&self, run_id: &str, step_id: StageId) -> Result<(), ApiError>;

    async fn complete_run(&self, run_id: &str, request: &CompleteRunRequest) -> Result<(), ApiError>;
}

/// The Job Trigger Service: starts a job and streams its output.
///
/// Dropping the returned stream aborts the request.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    async fn trigger(&self, job_id: &str) -> Result<ByteStream, ApiError>;
}
