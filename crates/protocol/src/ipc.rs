//! Inter-process communication protocol.
//!
//! This module defines the message types for asynchronous communication
//! between a front end (terminal renderer, dashboard bridge) and the run
//! controller in the core.
//!
//! The protocol follows an Operation/Event pattern:
//! - `Op`: Commands sent from the front end to the controller
//! - `Event`: Status updates sent from the controller to the front end
//!
//! Communication is asynchronous and channel-based, so the front end stays
//! responsive (for instance to a cancel request) while a stage stream is
//! being read.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::log_models::LogLine;
use crate::run_models::{ExecutionMode, RunConfiguration, RunStatus};
use crate::stage_models::{StageId, StageStatus};

/// Irrecoverable actions that need an explicit confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmationKind {
    /// Abort the active run and discard its state.
    Cancel,
    /// Re-run the failed stage.
    Retry,
    /// Leave a finished run and return to idle.
    NewRun,
}

/// Operations sent from the front end to the controller.
///
/// Uses tagged enum serialization for TypeScript compatibility:
/// ```json
/// {
///   "type": "startRun",
///   "payload": {
///     "config": { "source_system": "Snowflake_Prod_DW", "...": "..." },
///     "mode": "manual"
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Op {
    /// Validate the configuration and start a new run.
    StartRun {
        config: RunConfiguration,
        mode: ExecutionMode,
    },

    /// Manual mode: start the next stage, or report completion once every
    /// stage is done.
    RunNextStage,

    /// Ask to cancel the active run. Needs `Confirm`.
    RequestCancel,

    /// Ask to retry the failed stage. Needs `Confirm`.
    RequestRetry,

    /// Ask to return from a finished run to idle. Needs `Confirm`.
    RequestNewRun,

    /// Execute the pending confirmation.
    Confirm,

    /// Drop the pending confirmation.
    Dismiss,

    /// Stop the controller. Any active stream is aborted.
    Shutdown,
}

/// Events sent from the controller to the front end.
///
/// ```json
/// {
///   "type": "stageStatusUpdate",
///   "payload": { "run_id": "RUN-20240331-101500", "stage_id": 3, "status": "processing" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A run was accepted by the Run Tracking Service.
    RunStarted {
        run_id: String,
        stage_count: usize,
        mode: ExecutionMode,
    },

    /// The run's top-level status or stage index changed.
    RunStatusUpdate {
        run_id: String,
        status: RunStatus,
        stage_index: usize,
    },

    /// A stage changed status.
    StageStatusUpdate {
        run_id: String,
        stage_id: StageId,
        status: StageStatus,
    },

    /// A line was played back into the visible log.
    LogAppended { run_id: String, line: LogLine },

    /// Progress of the current stage, in percent.
    ProgressUpdate { stage_id: StageId, percent: f64 },

    /// Elapsed processing time, emitted once per second while a stage runs.
    ElapsedTick { elapsed_seconds: u64 },

    /// Manual mode: the runner is halted. `next_stage` is `None` when only
    /// the completion report remains.
    AwaitingInput {
        run_id: String,
        next_stage: Option<StageId>,
    },

    /// An action is waiting for `Confirm` or `Dismiss`.
    ConfirmationRequired { action: ConfirmationKind },

    /// A stage completed but the Run Tracking Service did not acknowledge it.
    StageUnconfirmed {
        run_id: String,
        stage_id: StageId,
        reason: String,
    },

    /// A best-effort call to the Run Tracking Service failed.
    PersistenceWarning {
        run_id: String,
        stage_id: Option<StageId>,
        reason: String,
    },

    /// Every stage completed and the run was reported as successful.
    RunCompleted { run_id: String },

    /// A stage failed; the run halts until a retry.
    RunFailed {
        run_id: String,
        stage_id: StageId,
        error: String,
    },

    /// The run was cancelled by the user.
    RunCancelled { run_id: String },

    /// Per-run state was discarded; the controller is idle.
    RunReset,

    /// The configuration was rejected or the service refused to start a run.
    StartFailed { error: String },

    /// A command could not be applied in the current state.
    CommandRejected { command: String, reason: String },
}
