//! Integration tests for the run lifecycle controller.
//!
//! Every test drives a spawned controller through its `Op` channel, with the
//! offline Run Tracking Service and a simulated Job Trigger Service, and
//! observes it through the snapshot and the event stream.

mod common;

use common::*;
use er_core::clients::adapters::{CallKind, JobScript, TrackerCall};
use er_core::config::loader::load_config;
use er_protocol::ipc::{ConfirmationKind, Event, Op};
use er_protocol::log_models::LogLevel;
use er_protocol::run_models::{ExecutionMode, RunConfiguration, RunSnapshot, RunStatus};
use er_protocol::stage_models::StageStatus;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn start(config: RunConfiguration, mode: ExecutionMode) -> Op {
    Op::StartRun { config, mode }
}

#[tokio::test]
async fn test_standard_run_completes_every_stage() {
    let mut h = spawn_offline(quick_trigger());
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    let snap = h.wait_until(|s| s.run.status == RunStatus::Completed).await;
    assert_eq!(snap.stages.len(), 10);
    assert_eq!(snap.run.current_stage_index, 10);
    assert!(snap.stages.iter().all(|s| s.status == StageStatus::Completed && s.confirmed));
    assert_eq!(snap.logs.len(), 30);
    assert_lines_grouped_by_stage(&snap);

    h.next_event(|e| matches!(e, Event::RunCompleted { .. })).await;
    assert_monotonic_index(&h.seen);
    assert_single_processing(&h.seen);

    let completion = h
        .tracker
        .calls()
        .into_iter()
        .find_map(|call| match call {
            TrackerCall::CompleteRun { request, .. } => Some(request),
            _ => None,
        })
        .expect("completion reported");
    assert_eq!(completion.status, "SUCCESS");
    assert_eq!(completion.total_records, 30);
    assert!(completion.summary.starts_with("10 stages completed for Snowflake_Prod_DW"));
}

#[tokio::test]
async fn test_stream_error_at_stage_five_fails_run() {
    let trigger = quick_trigger().with_script(
        "ecl_staging_2b",
        JobScript::FailAfter {
            lines: vec!["INFO Loading ratios".to_string()],
            error: "connection reset by peer".to_string(),
        },
    );
    let mut h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    let snap = h.wait_until(|s| s.run.status == RunStatus::Failed).await;
    assert_eq!(snap.stages.len(), 10);
    assert_eq!(
        stage_statuses(&snap)[..5],
        [
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Failed,
        ]
    );
    assert!(snap.stages[5..].iter().all(|s| s.status == StageStatus::Pending));
    assert_eq!(snap.run.current_stage_index, 4);

    assert_eq!(
        messages_of(&snap, 5),
        vec![
            "INFO Loading ratios".to_string(),
            "Stream connection failed: connection reset by peer".to_string()
        ]
    );
    assert_eq!(levels_of(&snap, 5).last(), Some(&LogLevel::Error));

    let run_id = snap.run.run_id.clone();
    assert_eq!(h.tracker.step_status(&run_id, 5), Some(StageStatus::Failed));
    assert_eq!(h.trigger.triggered().len(), 5);

    let failed = h.next_event(|e| matches!(e, Event::RunFailed { .. })).await;
    match failed {
        Event::RunFailed { stage_id, error, .. } => {
            assert_eq!(stage_id, 5);
            assert_eq!(error, "connection reset by peer");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_monotonic_index(&h.seen);
    assert_single_processing(&h.seen);
}

#[tokio::test]
async fn test_retail_manual_run_waits_for_each_stage() {
    let mut h = spawn_offline(quick_trigger());
    h.handle
        .send(start(retail_run(), ExecutionMode::Manual))
        .await
        .unwrap();

    let snap = h.wait_until(|s| s.awaiting_input).await;
    assert_eq!(snap.stages.len(), 12);
    assert_eq!(snap.run.current_stage_index, 0);
    assert!(h.trigger.triggered().is_empty());

    h.handle.send(Op::RunNextStage).await.unwrap();
    let snap = h
        .wait_until(|s| s.awaiting_input && s.run.current_stage_index == 1)
        .await;
    assert_eq!(snap.stages[0].status, StageStatus::Completed);
    assert_eq!(snap.stages[1].status, StageStatus::Pending);

    // Nothing moves without another command.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let still = h.handle.snapshot();
    assert!(still.awaiting_input);
    assert_eq!(still.stages[1].status, StageStatus::Pending);
    assert_eq!(
        h.trigger.triggered(),
        vec!["ecl_retail_data_collection".to_string()]
    );

    let halted = h
        .next_event(|e| matches!(e, Event::AwaitingInput { next_stage: Some(2), .. }))
        .await;
    assert!(matches!(halted, Event::AwaitingInput { .. }));

    h.handle.send(Op::RunNextStage).await.unwrap();
    h.wait_until(|s| s.awaiting_input && s.run.current_stage_index == 2)
        .await;
    assert_eq!(h.trigger.triggered().len(), 2);
}

#[tokio::test]
async fn test_manual_run_reports_completion_on_last_command() {
    let project = create_test_project().unwrap();
    let config = load_config(project.path()).await.unwrap();
    let mut h = spawn_with(config, quick_trigger());

    h.handle
        .send(start(retail_run(), ExecutionMode::Manual))
        .await
        .unwrap();
    let snap = h.wait_until(|s| s.awaiting_input).await;
    assert_eq!(snap.stages.len(), 3);

    for index in 1..=3 {
        h.handle.send(Op::RunNextStage).await.unwrap();
        h.wait_until(|s| s.awaiting_input && s.run.current_stage_index == index)
            .await;
    }

    let snap = h.handle.snapshot();
    assert_eq!(snap.run.status, RunStatus::Running);
    h.next_event(|e| matches!(e, Event::AwaitingInput { next_stage: None, .. }))
        .await;

    h.handle.send(Op::RunNextStage).await.unwrap();
    h.wait_until(|s| s.run.status == RunStatus::Completed).await;

    // Stage 2 has no job of its own and runs the configured default.
    assert_eq!(
        h.trigger.triggered(),
        vec![
            "retail_collect".to_string(),
            "ecl_generic".to_string(),
            "retail_stage_1".to_string()
        ]
    );
}

#[tokio::test]
async fn test_cancel_when_idle_is_a_no_op() {
    let mut h = spawn_offline(quick_trigger());

    h.handle.send(Op::RequestCancel).await.unwrap();
    h.handle.send(Op::Confirm).await.unwrap();
    h.next_event(|e| matches!(e, Event::CommandRejected { .. }))
        .await;

    assert_eq!(h.handle.snapshot(), RunSnapshot::default());
    assert!(!has_event(&h.seen, |e| matches!(
        e,
        Event::ConfirmationRequired { .. } | Event::RunCancelled { .. } | Event::RunReset
    )));
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_stage_returns_to_idle() {
    let trigger = quick_trigger().with_script(
        "ecl_staging_1",
        JobScript::Hang(vec!["PROCESS Staging accounts".to_string()]),
    );
    let mut h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    let snap = h
        .wait_until(|s| s.logs.iter().any(|l| l.message == "PROCESS Staging accounts"))
        .await;
    assert_eq!(snap.stages[2].status, StageStatus::Processing);
    let run_id = snap.run.run_id.clone();

    h.handle.send(Op::RequestCancel).await.unwrap();
    h.wait_until(|s| s.pending_confirmation == Some(ConfirmationKind::Cancel))
        .await;
    h.handle.send(Op::Confirm).await.unwrap();

    h.next_event(|e| matches!(e, Event::RunReset)).await;
    let snap = h.handle.snapshot();
    assert_eq!(snap, RunSnapshot::default());
    assert!(snap.stages.is_empty());
    assert!(snap.logs.is_empty());

    assert!(has_event(&h.seen, |e| matches!(
        e,
        Event::RunCancelled { run_id: id } if *id == run_id
    )));
    assert_eq!(
        h.tracker.status_history(&run_id, 3),
        vec![StageStatus::Processing]
    );

    // A fresh run can start right away.
    h.trigger.set_script("ecl_staging_1", quick_lines());
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();
    h.wait_until(|s| s.run.status == RunStatus::Completed).await;
}

#[tokio::test]
async fn test_dismissed_cancel_keeps_stage_running() {
    let trigger = quick_trigger().with_script(
        "ecl_data_collection",
        JobScript::Hang(vec!["INFO Querying partition".to_string()]),
    );
    let h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();
    h.wait_until(|s| !s.logs.is_empty()).await;

    h.handle.send(Op::RequestCancel).await.unwrap();
    h.wait_until(|s| s.pending_confirmation.is_some()).await;
    h.handle.send(Op::Dismiss).await.unwrap();
    let snap = h.wait_until(|s| s.pending_confirmation.is_none()).await;

    assert_eq!(snap.run.status, RunStatus::Running);
    assert_eq!(snap.stages[0].status, StageStatus::Processing);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_preserves_earlier_stages() {
    let trigger = quick_trigger().with_script(
        "ecl_staging_1",
        JobScript::FailAfter {
            lines: vec!["INFO Staging accounts".to_string()],
            error: "worker lost".to_string(),
        },
    );
    let mut h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    let failed = h.wait_until(|s| s.run.status == RunStatus::Failed).await;
    assert_eq!(failed.run.current_stage_index, 2);
    let earlier: Vec<_> = failed
        .logs
        .iter()
        .filter(|l| matches!(l.stage_id, Some(1) | Some(2)))
        .cloned()
        .collect();

    h.trigger.set_script("ecl_staging_1", quick_lines());
    h.handle.send(Op::RequestRetry).await.unwrap();
    h.wait_until(|s| s.pending_confirmation == Some(ConfirmationKind::Retry))
        .await;
    h.handle.send(Op::Confirm).await.unwrap();

    let done = h.wait_until(|s| s.run.status == RunStatus::Completed).await;
    assert_eq!(done.logs[..earlier.len()], earlier[..]);
    assert!(!messages_of(&done, 3)
        .iter()
        .any(|m| m.starts_with("Stream connection failed")));
    assert_eq!(messages_of(&done, 3).len(), 3);

    h.next_event(|e| matches!(e, Event::RunCompleted { .. })).await;
    assert_eq!(
        status_updates(&h.seen, 3),
        vec![
            StageStatus::Processing,
            StageStatus::Failed,
            StageStatus::Pending,
            StageStatus::Processing,
            StageStatus::Completed,
        ]
    );
    assert_eq!(
        status_updates(&h.seen, 1),
        vec![StageStatus::Processing, StageStatus::Completed]
    );
    assert_single_processing(&h.seen);

    let run_id = done.run.run_id.clone();
    assert!(h.tracker.calls().contains(&TrackerCall::RetryStep {
        run_id,
        step_id: 3
    }));
}

#[tokio::test]
async fn test_refused_retry_stays_failed() {
    let trigger = quick_trigger().with_script(
        "ecl_data_collection",
        JobScript::Unavailable("DAG paused".to_string()),
    );
    let mut h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();
    h.wait_until(|s| s.run.status == RunStatus::Failed).await;

    h.tracker.fail(CallKind::RetryStep);
    h.handle
        .send_all([Op::RequestRetry, Op::Confirm])
        .await
        .unwrap();
    h.next_event(|e| matches!(e, Event::CommandRejected { command, .. } if command == "retry"))
        .await;

    let snap = h.handle.snapshot();
    assert_eq!(snap.run.status, RunStatus::Failed);
    assert_eq!(snap.stages[0].status, StageStatus::Failed);
    assert_eq!(snap.pending_confirmation, None);
}

#[tokio::test]
async fn test_new_run_after_completion_resets() {
    let mut h = spawn_offline(quick_trigger());
    h.handle
        .send(start(retail_run(), ExecutionMode::Automated))
        .await
        .unwrap();
    h.wait_until(|s| s.run.status == RunStatus::Completed).await;

    // Completed runs cannot be retried.
    h.handle.send(Op::RequestRetry).await.unwrap();
    h.next_event(|e| matches!(e, Event::CommandRejected { command, .. } if command == "requestRetry"))
        .await;

    h.handle
        .send_all([Op::RequestNewRun, Op::Confirm])
        .await
        .unwrap();
    h.next_event(|e| matches!(e, Event::RunReset)).await;
    assert_eq!(h.handle.snapshot(), RunSnapshot::default());
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected_before_any_call() {
    let mut h = spawn_offline(quick_trigger());
    let config = RunConfiguration {
        source_system: "Oracle_Legacy_DB".to_string(),
        ..standard_run()
    };
    h.handle
        .send(start(config, ExecutionMode::Automated))
        .await
        .unwrap();

    let failed = h.next_event(|e| matches!(e, Event::StartFailed { .. })).await;
    match failed {
        Event::StartFailed { error } => assert!(error.contains("offline"), "{error}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.handle.snapshot().run.status, RunStatus::Idle);
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_start_failure_surfaces_service_message() {
    let mut h = spawn_offline(quick_trigger());
    h.tracker.fail(CallKind::StartRun);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    let failed = h.next_event(|e| matches!(e, Event::StartFailed { .. })).await;
    match failed {
        Event::StartFailed { error } => assert!(error.contains("HTTP 503"), "{error}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.handle.snapshot().run.status, RunStatus::Idle);
}

#[tokio::test]
async fn test_unrecorded_completion_waits_for_another_attempt() {
    let mut h = spawn_offline(quick_trigger());
    h.tracker.fail(CallKind::CompleteRun);
    h.handle
        .send(start(retail_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    let snap = h
        .wait_until(|s| s.awaiting_input && s.run.current_stage_index == 12)
        .await;
    assert_eq!(snap.run.status, RunStatus::Running);
    h.next_event(|e| matches!(e, Event::PersistenceWarning { stage_id: None, .. }))
        .await;

    h.tracker.recover(CallKind::CompleteRun);
    h.handle.send(Op::RunNextStage).await.unwrap();
    h.wait_until(|s| s.run.status == RunStatus::Completed).await;
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let trigger = quick_trigger().with_script(
        "ecl_data_collection",
        JobScript::Hang(vec!["INFO Querying partition".to_string()]),
    );
    let mut h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();
    h.wait_until(|s| !s.logs.is_empty()).await;

    h.handle
        .send(start(retail_run(), ExecutionMode::Automated))
        .await
        .unwrap();
    h.next_event(|e| matches!(e, Event::CommandRejected { command, .. } if command == "startRun"))
        .await;
    assert_eq!(h.handle.snapshot().stages.len(), 10);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_pauses_during_confirmation() {
    let trigger = quick_trigger().with_script(
        "ecl_data_collection",
        JobScript::Hang(vec!["INFO Querying partition".to_string()]),
    );
    let h = spawn_offline(trigger);
    h.handle
        .send(start(standard_run(), ExecutionMode::Automated))
        .await
        .unwrap();

    h.wait_until(|s| s.run.elapsed_seconds >= 3).await;

    h.handle.send(Op::RequestCancel).await.unwrap();
    let paused = h.wait_until(|s| s.pending_confirmation.is_some()).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        h.handle.snapshot().run.elapsed_seconds,
        paused.run.elapsed_seconds
    );

    h.handle.send(Op::Dismiss).await.unwrap();
    h.wait_until(|s| s.run.elapsed_seconds > paused.run.elapsed_seconds)
        .await;

    h.handle.shutdown().await.unwrap();
}
