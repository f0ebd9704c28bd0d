//! Derived view state.
//!
//! Front ends render from a [`RunSnapshot`]; everything they need beyond the
//! raw fields is computed here instead of being stored.

use er_protocol::log_models::{LogLevel, LogLine};
use er_protocol::run_models::{RunSnapshot, RunStatus};
use er_protocol::stage_models::{Stage, StageId, StageStatus};

/// Every stage has completed.
pub fn is_pipeline_complete(snapshot: &RunSnapshot) -> bool {
    !snapshot.stages.is_empty()
        && snapshot.run.current_stage_index >= snapshot.stages.len()
        && snapshot
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Completed)
}

/// Stage at the current index, if the run has not moved past the end.
pub fn current_stage(snapshot: &RunSnapshot) -> Option<&Stage> {
    snapshot.stages.get(snapshot.run.current_stage_index)
}

/// Label of the current stage; `Finished` once past the last one and
/// `Idle` before a run.
pub fn current_stage_label(snapshot: &RunSnapshot) -> &str {
    match current_stage(snapshot) {
        Some(stage) => &stage.label,
        None if snapshot.stages.is_empty() => "Idle",
        None => "Finished",
    }
}

/// A stream is open for some stage.
pub fn is_processing(snapshot: &RunSnapshot) -> bool {
    snapshot
        .stages
        .iter()
        .any(|s| s.status == StageStatus::Processing)
}

/// The run finished and its results can be opened.
pub fn results_available(snapshot: &RunSnapshot) -> bool {
    snapshot.run.status == RunStatus::Completed
}

pub fn can_start(snapshot: &RunSnapshot) -> bool {
    snapshot.run.status == RunStatus::Idle
}

pub fn can_cancel(snapshot: &RunSnapshot) -> bool {
    snapshot.run.status != RunStatus::Idle
}

pub fn can_retry(snapshot: &RunSnapshot) -> bool {
    snapshot.run.status == RunStatus::Failed
}

/// Manual mode is halted and the next command starts `Some(stage)`, or
/// reports completion when `None`.
pub fn next_manual_step(snapshot: &RunSnapshot) -> Option<Option<&Stage>> {
    snapshot.awaiting_input.then(|| current_stage(snapshot))
}

pub fn stage_label(snapshot: &RunSnapshot, stage_id: StageId) -> Option<&str> {
    snapshot
        .stages
        .iter()
        .find(|s| s.id == stage_id)
        .map(|s| s.label.as_str())
}

/// Lines of one stage, in display order.
pub fn stage_logs(snapshot: &RunSnapshot, stage_id: StageId) -> Vec<&LogLine> {
    snapshot
        .logs
        .iter()
        .filter(|line| line.stage_id == Some(stage_id))
        .collect()
}

/// Case-insensitive message search, optionally restricted to one level.
pub fn filter_logs<'a>(
    snapshot: &'a RunSnapshot,
    query: &str,
    level: Option<LogLevel>,
) -> Vec<&'a LogLine> {
    let needle = query.to_lowercase();
    snapshot
        .logs
        .iter()
        .filter(|line| level.map_or(true, |l| line.level == l))
        .filter(|line| needle.is_empty() || line.message.to_lowercase().contains(&needle))
        .collect()
}
