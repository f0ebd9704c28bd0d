//! In-memory Run Tracking Service.
//!
//! Builds stage lists from the stage registry and records every call so a
//! run can be inspected afterwards. Failures can be injected per call kind.

use crate::clients::base::{ApiError, RunTracker};
use crate::registry::StageRegistry;
use async_trait::async_trait;
use er_protocol::api_models::{
    CompleteRunRequest, ExecutionDetails, StartRunRequest, StepLogEntry, StepRecord,
};
use er_protocol::run_models::PortfolioScope;
use er_protocol::stage_models::{StageId, StageStatus};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// A call received by the tracker, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCall {
    StartRun(StartRunRequest),
    ExecutionDetails {
        run_id: String,
    },
    UpdateStepStatus {
        run_id: String,
        step_id: StageId,
        status: StageStatus,
    },
    SaveLogs {
        run_id: String,
        step_id: StageId,
        logs: Vec<StepLogEntry>,
    },
    RetryStep {
        run_id: String,
        step_id: StageId,
    },
    CompleteRun {
        run_id: String,
        request: CompleteRunRequest,
    },
}

/// Call kinds that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    StartRun,
    ExecutionDetails,
    UpdateStepStatus,
    SaveLogs,
    RetryStep,
    CompleteRun,
}

#[derive(Debug, Default)]
struct TrackerState {
    runs: HashMap<String, Vec<StepRecord>>,
    calls: Vec<TrackerCall>,
    failing: HashSet<CallKind>,
    issued: HashSet<String>,
}

#[derive(Debug)]
pub struct OfflineRunTracker {
    registry: StageRegistry,
    state: Mutex<TrackerState>,
}

impl OfflineRunTracker {
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            registry,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call of `kind` fail with HTTP 503.
    pub fn fail(&self, kind: CallKind) {
        self.lock().failing.insert(kind);
    }

    /// Undo [`fail`](Self::fail).
    pub fn recover(&self, kind: CallKind) {
        self.lock().failing.remove(&kind);
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.lock().calls.clone()
    }

    /// Last status recorded for a step.
    pub fn step_status(&self, run_id: &str, step_id: StageId) -> Option<StageStatus> {
        self.lock()
            .runs
            .get(run_id)
            .and_then(|steps| steps.iter().find(|s| s.step_id == step_id))
            .map(|s| s.status)
    }

    /// Every status recorded for a step, oldest first.
    pub fn status_history(&self, run_id: &str, step_id: StageId) -> Vec<StageStatus> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TrackerCall::UpdateStepStatus {
                    run_id: r,
                    step_id: s,
                    status,
                } if r == run_id && *s == step_id => Some(*status),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TrackerCall, kind: CallKind) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(&kind) {
            return Err(ApiError::Http {
                status: 503,
                message: format!("{kind:?} unavailable"),
            });
        }
        Ok(())
    }

    fn next_run_id(state: &mut TrackerState) -> String {
        let base = format!("RUN-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        let mut candidate = base.clone();
        let mut suffix = 2;
        while state.issued.contains(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        state.issued.insert(candidate.clone());
        candidate
    }
}

#[async_trait]
impl RunTracker for OfflineRunTracker {
    async fn start_run(&self, request: &StartRunRequest) -> Result<String, ApiError> {
        self.record(TrackerCall::StartRun(request.clone()), CallKind::StartRun)?;

        let scope: Vec<PortfolioScope> = request
            .scope
            .iter()
            .map(|s| s.parse())
            .collect::<Result<_, _>>()
            .map_err(|err| ApiError::Http {
                status: 400,
                message: format!("{err}"),
            })?;

        let steps = self
            .registry
            .for_selection(&scope)
            .iter()
            .map(|d| StepRecord {
                step_id: d.id,
                step_name: d.label.clone(),
                status: StageStatus::Pending,
                dag_id: d.job.clone(),
            })
            .collect();

        let mut state = self.lock();
        let run_id = Self::next_run_id(&mut state);
        state.runs.insert(run_id.clone(), steps);
        tracing::debug!(%run_id, "offline run registered");
        Ok(run_id)
    }

    async fn execution_details(&self, run_id: &str) -> Result<ExecutionDetails, ApiError> {
        self.record(
            TrackerCall::ExecutionDetails {
                run_id: run_id.to_string(),
            },
            CallKind::ExecutionDetails,
        )?;

        let state = self.lock();
        let steps = state.runs.get(run_id).cloned().ok_or_else(|| ApiError::Http {
            status: 404,
            message: format!("Run {run_id} not found"),
        })?;
        Ok(ExecutionDetails { steps })
    }

    async fn update_step_status(
        &self,
        run_id: &str,
        step_id: StageId,
        status: StageStatus,
    ) -> Result<(), ApiError> {
        self.record(
            TrackerCall::UpdateStepStatus {
                run_id: run_id.to_string(),
                step_id,
                status,
            },
            CallKind::UpdateStepStatus,
        )?;

        let mut state = self.lock();
        if let Some(step) = state
            .runs
            .get_mut(run_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.step_id == step_id))
        {
            step.status = status;
        }
        Ok(())
    }

    async fn save_logs(
        &self,
        run_id: &str,
        step_id: StageId,
        logs: &[StepLogEntry],
    ) -> Result<(), ApiError> {
        self.record(
            TrackerCall::SaveLogs {
                run_id: run_id.to_string(),
                step_id,
                logs: logs.to_vec(),
            },
            CallKind::SaveLogs,
        )
    }

    async fn retry_step(&self, run_id: &str, step_id: StageId) -> Result<(), ApiError> {
        self.record(
            TrackerCall::RetryStep {
                run_id: run_id.to_string(),
                step_id,
            },
            CallKind::RetryStep,
        )?;

        let mut state = self.lock();
        if let Some(step) = state
            .runs
            .get_mut(run_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.step_id == step_id))
        {
            step.status = StageStatus::Pending;
        }
        Ok(())
    }

    async fn complete_run(&self, run_id: &str, request: &CompleteRunRequest) -> Result<(), ApiError> {
        self.record(
            TrackerCall::CompleteRun {
                run_id: run_id.to_string(),
                request: request.clone(),
            },
            CallKind::CompleteRun,
        )
    }
}
