//! Assertion helpers over recorded events and snapshots.

use er_protocol::ipc::Event;
use er_protocol::log_models::LogLevel;
use er_protocol::run_models::{RunSnapshot, RunStatus};
use er_protocol::stage_models::{StageId, StageStatus};
use std::collections::HashSet;

#[allow(dead_code)]
pub fn stage_statuses(snapshot: &RunSnapshot) -> Vec<StageStatus> {
    snapshot.stages.iter().map(|s| s.status).collect()
}

#[allow(dead_code)]
pub fn messages_of(snapshot: &RunSnapshot, stage_id: StageId) -> Vec<String> {
    snapshot
        .logs
        .iter()
        .filter(|line| line.stage_id == Some(stage_id))
        .map(|line| line.message.clone())
        .collect()
}

#[allow(dead_code)]
pub fn levels_of(snapshot: &RunSnapshot, stage_id: StageId) -> Vec<LogLevel> {
    snapshot
        .logs
        .iter()
        .filter(|line| line.stage_id == Some(stage_id))
        .map(|line| line.level)
        .collect()
}

/// Status updates recorded for one stage, in order.
#[allow(dead_code)]
pub fn status_updates(events: &[Event], stage: StageId) -> Vec<StageStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::StageStatusUpdate {
                stage_id, status, ..
            } if *stage_id == stage => Some(*status),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn has_event<F>(events: &[Event], predicate: F) -> bool
where
    F: Fn(&Event) -> bool,
{
    events.iter().any(predicate)
}

/// The stage index never decreases while the run is running.
#[allow(dead_code)]
pub fn assert_monotonic_index(events: &[Event]) {
    let mut last = 0;
    for event in events {
        match event {
            Event::RunStarted { .. } => last = 0,
            Event::RunStatusUpdate {
                status: RunStatus::Running,
                stage_index,
                ..
            } => {
                assert!(
                    *stage_index >= last,
                    "stage index went back from {last} to {stage_index}"
                );
                last = *stage_index;
            }
            _ => {}
        }
    }
}

/// No two stages are processing at the same time.
#[allow(dead_code)]
pub fn assert_single_processing(events: &[Event]) {
    let mut processing: HashSet<StageId> = HashSet::new();
    for event in events {
        match event {
            Event::StageStatusUpdate {
                stage_id, status, ..
            } => {
                if *status == StageStatus::Processing {
                    processing.insert(*stage_id);
                } else {
                    processing.remove(stage_id);
                }
                assert!(
                    processing.len() <= 1,
                    "stages {processing:?} are processing at once"
                );
            }
            Event::RunReset => processing.clear(),
            _ => {}
        }
    }
}

/// Lines appear grouped by stage, in stage order.
#[allow(dead_code)]
pub fn assert_lines_grouped_by_stage(snapshot: &RunSnapshot) {
    let ids: Vec<StageId> = snapshot.logs.iter().filter_map(|l| l.stage_id).collect();
    assert!(
        ids.windows(2).all(|pair| pair[0] <= pair[1]),
        "log lines interleave stages: {ids:?}"
    );
}
