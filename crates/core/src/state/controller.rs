//! Run lifecycle controller.
//!
//! One [`RunController`] task owns all state of the active run. Front ends
//! talk to it through a [`RunHandle`]: commands go in as [`Op`]s, changes
//! come out as [`Event`]s and as a [`RunSnapshot`] on a watch channel.
//!
//! While a stage executes, the task `select!`s over three sources: the stage
//! future, the command channel and a one second ticker for elapsed time.
//! Commands are therefore handled in arrival order, and a confirmed cancel
//! aborts the stage's stream immediately.
//!
//! Run status transitions:
//!
//! ```text
//! Idle --start--> Running --all stages done--> Completed
//!                    |  ^
//!        stage fails |  | retry (confirmed)
//!                    v  |
//!                   Failed
//!
//! any non-idle --cancel (confirmed)--> Idle
//! Completed | Failed --new run (confirmed)--> Idle
//! ```

use crate::clients::base::{JobTrigger, RunTracker};
use crate::config::models::AppConfig;
use crate::engine::{RunnerSettings, StageOutcome, StageRunner};
use crate::registry::StageRegistry;
use crate::retry::persist;
use crate::state::run::{
    begin_run, complete_run, fail_run, prepare_retry, reset_run, set_awaiting_input,
    tick_elapsed, EventSink, RunBook,
};
use crate::state::validation::{stages_from_details, validate_config};
use anyhow::Result;
use er_protocol::api_models::{CompleteRunRequest, StartRunRequest};
use er_protocol::config_models::SourceSystem;
use er_protocol::ipc::{ConfirmationKind, Event, Op};
use er_protocol::run_models::{ExecutionMode, RunConfiguration, RunSnapshot, RunStatus};
use er_protocol::stage_models::{Stage, StageStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const ELAPSED_TICK: Duration = Duration::from_secs(1);
const OP_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("run controller has stopped")]
    Stopped,
    #[error("run controller task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Front end side of a running controller.
#[derive(Debug)]
pub struct RunHandle {
    op_tx: mpsc::Sender<Op>,
    snapshot_rx: watch::Receiver<RunSnapshot>,
    join: JoinHandle<()>,
}

impl RunHandle {
    pub async fn send(&self, op: Op) -> Result<(), ControllerError> {
        self.op_tx.send(op).await.map_err(|_| ControllerError::Stopped)
    }

    /// Sends several commands in order.
    pub async fn send_all<I>(&self, ops: I) -> Result<(), ControllerError>
    where
        I: IntoIterator<Item = Op>,
    {
        for op in ops {
            self.send(op).await?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Waits until the snapshot satisfies `predicate` and returns it.
    pub async fn wait_until<F>(&self, predicate: F) -> Result<RunSnapshot, ControllerError>
    where
        F: FnMut(&RunSnapshot) -> bool,
    {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| ControllerError::Stopped)?;
        Ok(snapshot.clone())
    }

    /// Stops the controller, aborting any active stream, and waits for it.
    pub async fn shutdown(self) -> Result<(), ControllerError> {
        // A closed channel means the task is already on its way out.
        let _ = self.op_tx.send(Op::Shutdown).await;
        self.join.await?;
        Ok(())
    }
}

pub struct RunController {
    tracker: Arc<dyn RunTracker>,
    runner: StageRunner,
    registry: StageRegistry,
    sources: Vec<SourceSystem>,
    book: RunBook,
    sink: EventSink,
    op_rx: mpsc::Receiver<Op>,
    pending: Option<ConfirmationKind>,
    elapsed: u64,
    shutdown: bool,
}

impl RunController {
    /// Spawns the controller task.
    ///
    /// Returns the handle and the event stream. Dropping the event receiver
    /// is fine; the snapshot keeps being published.
    pub fn spawn(
        tracker: Arc<dyn RunTracker>,
        trigger: Arc<dyn JobTrigger>,
        config: &AppConfig,
    ) -> (RunHandle, mpsc::UnboundedReceiver<Event>) {
        let (op_tx, op_rx) = mpsc::channel(OP_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RunSnapshot::default());

        let runner = StageRunner::new(
            tracker.clone(),
            trigger,
            RunnerSettings::from_global(&config.global),
        );
        let controller = Self {
            tracker,
            runner,
            registry: config.registry.clone(),
            sources: config.global.sources.clone(),
            book: RunBook::default(),
            sink: EventSink::new(events_tx, snapshot_tx),
            op_rx,
            pending: None,
            elapsed: 0,
            shutdown: false,
        };

        let join = tokio::spawn(controller.run());
        (
            RunHandle {
                op_tx,
                snapshot_rx,
                join,
            },
            events_rx,
        )
    }

    async fn run(mut self) {
        tracing::debug!("run controller started");
        while !self.shutdown {
            let Some(op) = self.op_rx.recv().await else {
                break;
            };
            self.handle_op(op).await;
            self.drive().await;
        }
        tracing::debug!("run controller stopped");
    }

    /// Handles a command while no stage is executing.
    async fn handle_op(&mut self, op: Op) {
        tracing::debug!(?op, status = ?self.book.run.status, "command received");
        match op {
            Op::StartRun { config, mode } => self.start(config, mode).await,
            Op::RunNextStage => {
                if self.book.run.status == RunStatus::Running && self.book.awaiting_input {
                    set_awaiting_input(&mut self.book, &self.sink, false);
                } else {
                    reject(&self.sink, "runNextStage", "the runner is not waiting for input");
                }
            }
            Op::RequestCancel => {
                if self.book.run.status == RunStatus::Idle {
                    tracing::debug!("cancel ignored, no active run");
                } else {
                    request(&mut self.pending, &self.sink, ConfirmationKind::Cancel);
                }
            }
            Op::RequestRetry => {
                if self.book.run.status == RunStatus::Failed {
                    request(&mut self.pending, &self.sink, ConfirmationKind::Retry);
                } else {
                    reject(&self.sink, "requestRetry", "only a failed run can be retried");
                }
            }
            Op::RequestNewRun => {
                if matches!(
                    self.book.run.status,
                    RunStatus::Completed | RunStatus::Failed
                ) {
                    request(&mut self.pending, &self.sink, ConfirmationKind::NewRun);
                } else {
                    reject(
                        &self.sink,
                        "requestNewRun",
                        "a new run can only follow a finished one",
                    );
                }
            }
            Op::Confirm => match self.pending {
                Some(kind) => {
                    set_pending(&mut self.pending, &self.sink, None);
                    self.confirm(kind).await;
                }
                None => reject(&self.sink, "confirm", "nothing to confirm"),
            },
            Op::Dismiss => set_pending(&mut self.pending, &self.sink, None),
            Op::Shutdown => self.shutdown = true,
        }
    }

    async fn confirm(&mut self, kind: ConfirmationKind) {
        let status = self.book.run.status;
        match kind {
            ConfirmationKind::Cancel if status == RunStatus::Idle => {}
            ConfirmationKind::Cancel => self.cancel_run(),
            ConfirmationKind::Retry if status == RunStatus::Failed => self.retry().await,
            ConfirmationKind::NewRun
                if matches!(status, RunStatus::Completed | RunStatus::Failed) =>
            {
                tracing::info!(run_id = %self.book.run.run_id, "starting over");
                self.reset();
            }
            _ => reject(
                &self.sink,
                "confirm",
                format!("{kind:?} is not available while the run is {status:?}"),
            ),
        }
    }

    async fn start(&mut self, config: RunConfiguration, mode: ExecutionMode) {
        if self.book.run.status != RunStatus::Idle {
            reject(&self.sink, "startRun", "a run is already active");
            return;
        }

        match self.open_run(&config, mode).await {
            Ok((run_id, stages)) => {
                tracing::info!(%run_id, stages = stages.len(), mode = mode.as_str(), "run started");
                self.elapsed = 0;
                begin_run(&mut self.book, &self.sink, run_id, config, mode, stages);
                if mode == ExecutionMode::Manual {
                    set_awaiting_input(&mut self.book, &self.sink, true);
                }
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "run could not be started");
                self.sink.emit(Event::StartFailed {
                    error: format!("{err:#}"),
                });
            }
        }
    }

    /// Validates the configuration, registers the run and loads its stages.
    async fn open_run(
        &self,
        config: &RunConfiguration,
        mode: ExecutionMode,
    ) -> Result<(String, Vec<Stage>)> {
        validate_config(config, &self.sources)?;

        let request = StartRunRequest::new(config, mode);
        let run_id = self.tracker.start_run(&request).await?;
        let details = self.tracker.execution_details(&run_id).await?;
        let stages = stages_from_details(details, &self.registry, &config.scope)?;
        Ok((run_id, stages))
    }

    /// Executes stages until the run halts, fails, completes or stops.
    async fn drive(&mut self) {
        while !self.shutdown
            && self.book.run.status == RunStatus::Running
            && !self.book.awaiting_input
        {
            let index = self.book.run.current_stage_index;
            if index >= self.book.stages.len() {
                self.complete().await;
                return;
            }
            self.execute_stage(index).await;
        }
    }

    async fn execute_stage(&mut self, index: usize) {
        let cancel = CancellationToken::new();

        let outcome = {
            let Self {
                runner,
                book,
                sink,
                op_rx,
                pending,
                elapsed,
                shutdown,
                ..
            } = self;
            let runner = &*runner;
            let sink = &*sink;

            let stage = runner.advance(book, index, sink, &cancel);
            tokio::pin!(stage);

            let mut ticker = interval_at(Instant::now() + ELAPSED_TICK, ELAPSED_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    outcome = &mut stage => break outcome,
                    _ = ticker.tick(), if pending.is_none() => {
                        *elapsed += 1;
                        tick_elapsed(sink, *elapsed);
                    }
                    op = op_rx.recv(), if !cancel.is_cancelled() => {
                        let was_pending = pending.is_some();
                        match op {
                            Some(op) => handle_op_while_processing(op, pending, sink, &cancel, shutdown),
                            None => {
                                *shutdown = true;
                                cancel.cancel();
                            }
                        }
                        if was_pending && pending.is_none() {
                            // Resume counting a full second after the dialog closes.
                            ticker.reset();
                        }
                    }
                }
            }
        };

        self.book.run.elapsed_seconds = self.elapsed;

        match outcome {
            Ok(StageOutcome::Completed { .. }) => {
                if self.book.run.mode == ExecutionMode::Manual {
                    set_awaiting_input(&mut self.book, &self.sink, true);
                }
            }
            Ok(StageOutcome::Failed(error)) => {
                let stage_id = self.book.stages[index].id;
                fail_run(&mut self.book, &self.sink, stage_id, error.to_string());
            }
            Ok(StageOutcome::Aborted) => {
                if !self.shutdown {
                    self.cancel_run();
                }
            }
            Err(err) => {
                tracing::error!(%err, "stage index out of range, discarding run");
                self.reset();
            }
        }
    }

    async fn retry(&mut self) {
        let index = self.book.run.current_stage_index;
        let Some(stage) = self.book.stage(index) else {
            reject(&self.sink, "retry", "no stage to retry");
            return;
        };
        if stage.status != StageStatus::Failed {
            reject(&self.sink, "retry", "the current stage has not failed");
            return;
        }
        let stage_id = stage.id;
        let run_id = self.book.run.run_id.clone();

        if let Err(err) = self.tracker.retry_step(&run_id, stage_id).await {
            tracing::warn!(%run_id, stage_id, %err, "retry refused");
            reject(&self.sink, "retry", err.to_string());
            return;
        }

        tracing::info!(%run_id, stage_id, "retrying stage");
        prepare_retry(&mut self.book, &self.sink, index);
    }

    async fn complete(&mut self) {
        let run_id = self.book.run.run_id.clone();
        let request = CompleteRunRequest {
            status: "SUCCESS".to_string(),
            total_records: self.book.logs.len() as u64,
            summary: completion_summary(&self.book),
        };

        // Nothing can cancel the report; the controller reads no commands
        // until it returns.
        let never = CancellationToken::new();
        let tracker = &self.tracker;
        let reported = persist(&self.runner.settings().retry, &never, "complete_run", || {
            tracker.complete_run(&run_id, &request)
        })
        .await;

        match reported {
            Ok(()) => {
                tracing::info!(%run_id, elapsed = self.elapsed, "run completed");
                complete_run(&mut self.book, &self.sink);
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(%run_id, %reason, "run completion not recorded");
                self.sink.emit(Event::PersistenceWarning {
                    run_id,
                    stage_id: None,
                    reason,
                });
                set_awaiting_input(&mut self.book, &self.sink, true);
            }
        }
    }

    fn cancel_run(&mut self) {
        let run_id = self.book.run.run_id.clone();
        tracing::info!(%run_id, "run cancelled");
        self.sink.emit(Event::RunCancelled { run_id });
        self.reset();
    }

    fn reset(&mut self) {
        self.pending = None;
        self.elapsed = 0;
        reset_run(&mut self.book, &self.sink);
    }
}

/// Handles a command while a stage is executing. Only the confirmation
/// protocol and shutdown act; everything else is rejected.
fn handle_op_while_processing(
    op: Op,
    pending: &mut Option<ConfirmationKind>,
    sink: &EventSink,
    cancel: &CancellationToken,
    shutdown: &mut bool,
) {
    match op {
        Op::RequestCancel => request(pending, sink, ConfirmationKind::Cancel),
        Op::Confirm => match pending.take() {
            Some(ConfirmationKind::Cancel) => {
                sink.patch(|snapshot| snapshot.pending_confirmation = None);
                tracing::info!("aborting active stage");
                cancel.cancel();
            }
            Some(kind) => {
                sink.patch(|snapshot| snapshot.pending_confirmation = None);
                reject(
                    sink,
                    "confirm",
                    format!("{kind:?} is not available while a stage is running"),
                );
            }
            None => reject(sink, "confirm", "nothing to confirm"),
        },
        Op::Dismiss => set_pending(pending, sink, None),
        Op::Shutdown => {
            *shutdown = true;
            cancel.cancel();
        }
        Op::StartRun { .. } => reject(sink, "startRun", "a run is already active"),
        Op::RunNextStage => reject(sink, "runNextStage", "a stage is already running"),
        Op::RequestRetry => reject(sink, "requestRetry", "only a failed run can be retried"),
        Op::RequestNewRun => reject(
            sink,
            "requestNewRun",
            "a new run can only follow a finished one",
        ),
    }
}

fn set_pending(
    pending: &mut Option<ConfirmationKind>,
    sink: &EventSink,
    value: Option<ConfirmationKind>,
) {
    *pending = value;
    sink.patch(|snapshot| snapshot.pending_confirmation = value);
}

fn request(pending: &mut Option<ConfirmationKind>, sink: &EventSink, action: ConfirmationKind) {
    set_pending(pending, sink, Some(action));
    sink.emit(Event::ConfirmationRequired { action });
}

fn reject(sink: &EventSink, command: &str, reason: impl Into<String>) {
    let reason = reason.into();
    tracing::debug!(command, %reason, "command rejected");
    sink.emit(Event::CommandRejected {
        command: command.to_string(),
        reason,
    });
}

fn completion_summary(book: &RunBook) -> String {
    match &book.config {
        Some(config) => format!(
            "{} stages completed for {} as of {} ({} methodology, {})",
            book.stages.len(),
            config.source_system,
            config.snapshot_date,
            config.methodology.map(|m| m.as_str()).unwrap_or("unspecified"),
            config.scope_labels().join(", "),
        ),
        None => format!("{} stages completed", book.stages.len()),
    }
}
