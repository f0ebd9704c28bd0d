//! Run state transitions.
//!
//! A [`RunBook`] holds the mutable state of the active run. Every function in
//! this module applies one transition to the book, mirrors it into the
//! published [`RunSnapshot`] and emits the matching [`Event`]. Keeping the
//! three in one place means front ends never see a snapshot that disagrees
//! with the event stream.

use er_protocol::ipc::{ConfirmationKind, Event};
use er_protocol::log_models::LogLine;
use er_protocol::run_models::{ExecutionMode, RunConfiguration, RunSnapshot, RunState, RunStatus};
use er_protocol::stage_models::{Stage, StageId, StageStatus};
use tokio::sync::{mpsc, watch};

/// Mutable state of the active run.
#[derive(Debug, Default, Clone)]
pub struct RunBook {
    pub run: RunState,
    pub config: Option<RunConfiguration>,
    pub stages: Vec<Stage>,
    /// Lines already played back, in display order.
    pub logs: Vec<LogLine>,
    pub awaiting_input: bool,
}

impl RunBook {
    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Played-back lines belonging to `stage_id`.
    pub fn stage_logs(&self, stage_id: StageId) -> impl Iterator<Item = &LogLine> {
        self.logs
            .iter()
            .filter(move |line| line.stage_id == Some(stage_id))
    }

    fn snapshot(&self, progress: f64, pending: Option<ConfirmationKind>) -> RunSnapshot {
        RunSnapshot {
            run: self.run.clone(),
            config: self.config.clone(),
            stages: self.stages.clone(),
            logs: self.logs.clone(),
            progress,
            awaiting_input: self.awaiting_input,
            pending_confirmation: pending,
        }
    }
}

/// Output side of the controller: the event stream and the snapshot.
#[derive(Debug)]
pub struct EventSink {
    events_tx: mpsc::UnboundedSender<Event>,
    snapshot_tx: watch::Sender<RunSnapshot>,
}

impl EventSink {
    pub fn new(
        events_tx: mpsc::UnboundedSender<Event>,
        snapshot_tx: watch::Sender<RunSnapshot>,
    ) -> Self {
        Self {
            events_tx,
            snapshot_tx,
        }
    }

    /// Sends an event. A dropped receiver is not an error; the snapshot
    /// remains authoritative.
    pub fn emit(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }

    pub fn patch<F>(&self, modify: F)
    where
        F: FnOnce(&mut RunSnapshot),
    {
        self.snapshot_tx.send_modify(modify);
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Replaces the whole snapshot from the book, keeping the pending
    /// confirmation and current progress.
    pub fn publish(&self, book: &RunBook) {
        self.snapshot_tx.send_modify(|snapshot| {
            *snapshot = book.snapshot(snapshot.progress, snapshot.pending_confirmation);
        });
    }

    fn emit_run_status(&self, book: &RunBook) {
        self.emit(Event::RunStatusUpdate {
            run_id: book.run.run_id.clone(),
            status: book.run.status,
            stage_index: book.run.current_stage_index,
        });
    }
}

/// Installs a freshly started run.
pub fn begin_run(
    book: &mut RunBook,
    sink: &EventSink,
    run_id: String,
    config: RunConfiguration,
    mode: ExecutionMode,
    stages: Vec<Stage>,
) {
    *book = RunBook {
        run: RunState {
            run_id: run_id.clone(),
            status: RunStatus::Running,
            current_stage_index: 0,
            elapsed_seconds: 0,
            mode,
        },
        config: Some(config),
        stages,
        logs: Vec::new(),
        awaiting_input: false,
    };
    sink.patch(|snapshot| snapshot.progress = 0.0);
    sink.publish(book);
    sink.emit(Event::RunStarted {
        run_id,
        stage_count: book.stages.len(),
        mode,
    });
    sink.emit_run_status(book);
}

/// Moves a stage to `status`. Illegal transitions are refused and logged.
pub fn set_stage_status(
    book: &mut RunBook,
    sink: &EventSink,
    index: usize,
    status: StageStatus,
) -> bool {
    let Some(stage) = book.stages.get_mut(index) else {
        return false;
    };
    if !stage.status.can_transition_to(status) {
        tracing::warn!(
            stage_id = stage.id,
            from = %stage.status,
            to = %status,
            "refusing illegal stage transition"
        );
        return false;
    }

    stage.status = status;
    if status == StageStatus::Processing {
        stage.confirmed = true;
    }
    let stage_id = stage.id;
    let confirmed = stage.confirmed;

    sink.patch(|snapshot| {
        if let Some(s) = snapshot.stages.get_mut(index) {
            s.status = status;
            s.confirmed = confirmed;
        }
    });
    sink.emit(Event::StageStatusUpdate {
        run_id: book.run.run_id.clone(),
        stage_id,
        status,
    });
    true
}

/// Flags a completed stage whose completion never reached the service.
pub fn mark_unconfirmed(book: &mut RunBook, sink: &EventSink, index: usize, reason: String) {
    let Some(stage) = book.stages.get_mut(index) else {
        return;
    };
    stage.confirmed = false;
    let stage_id = stage.id;

    sink.patch(|snapshot| {
        if let Some(s) = snapshot.stages.get_mut(index) {
            s.confirmed = false;
        }
    });
    sink.emit(Event::StageUnconfirmed {
        run_id: book.run.run_id.clone(),
        stage_id,
        reason,
    });
}

/// Appends a played-back line to the visible log.
pub fn append_log(book: &mut RunBook, sink: &EventSink, line: LogLine) {
    book.logs.push(line.clone());
    sink.patch(|snapshot| snapshot.logs.push(line.clone()));
    sink.emit(Event::LogAppended {
        run_id: book.run.run_id.clone(),
        line,
    });
}

pub fn set_progress(sink: &EventSink, stage_id: StageId, percent: f64) {
    sink.patch(|snapshot| snapshot.progress = percent);
    sink.emit(Event::ProgressUpdate { stage_id, percent });
}

/// Moves to the next stage. The index never passes the stage count.
pub fn advance_index(book: &mut RunBook, sink: &EventSink) {
    if book.run.current_stage_index >= book.stages.len() {
        return;
    }
    book.run.current_stage_index += 1;
    let index = book.run.current_stage_index;
    sink.patch(|snapshot| snapshot.run.current_stage_index = index);
    sink.emit_run_status(book);
}

/// Halts (or resumes) the runner until a run-next-stage command.
pub fn set_awaiting_input(book: &mut RunBook, sink: &EventSink, awaiting: bool) {
    if book.awaiting_input == awaiting {
        return;
    }
    book.awaiting_input = awaiting;
    sink.patch(|snapshot| snapshot.awaiting_input = awaiting);
    if awaiting {
        sink.emit(Event::AwaitingInput {
            run_id: book.run.run_id.clone(),
            next_stage: book.stage(book.run.current_stage_index).map(|s| s.id),
        });
    }
}

/// Publishes the elapsed processing time.
pub fn tick_elapsed(sink: &EventSink, elapsed_seconds: u64) {
    sink.patch(|snapshot| snapshot.run.elapsed_seconds = elapsed_seconds);
    sink.emit(Event::ElapsedTick { elapsed_seconds });
}

/// Halts the run on a failed stage. The stage index stays where it is.
pub fn fail_run(book: &mut RunBook, sink: &EventSink, stage_id: StageId, error: String) {
    book.run.status = RunStatus::Failed;
    book.awaiting_input = false;
    sink.patch(|snapshot| {
        snapshot.run.status = RunStatus::Failed;
        snapshot.awaiting_input = false;
    });
    sink.emit_run_status(book);
    sink.emit(Event::RunFailed {
        run_id: book.run.run_id.clone(),
        stage_id,
        error,
    });
}

pub fn complete_run(book: &mut RunBook, sink: &EventSink) {
    debug_assert_eq!(book.run.current_stage_index, book.stages.len());
    book.run.status = RunStatus::Completed;
    book.awaiting_input = false;
    sink.patch(|snapshot| {
        snapshot.run.status = RunStatus::Completed;
        snapshot.awaiting_input = false;
    });
    sink.emit_run_status(book);
    sink.emit(Event::RunCompleted {
        run_id: book.run.run_id.clone(),
    });
}

/// Rewinds a failed run to re-execute the stage at `index`.
///
/// Lines of the failed stage are dropped; that stage and every later one
/// return to pending. Earlier stages and their lines are untouched.
pub fn prepare_retry(book: &mut RunBook, sink: &EventSink, index: usize) {
    let Some(failed_id) = book.stage(index).map(|s| s.id) else {
        return;
    };

    book.logs.retain(|line| line.stage_id != Some(failed_id));
    for stage in book.stages.iter_mut().skip(index) {
        stage.status = StageStatus::Pending;
        stage.confirmed = true;
    }
    book.run.status = RunStatus::Running;
    book.awaiting_input = false;

    sink.patch(|snapshot| snapshot.progress = 0.0);
    sink.publish(book);
    sink.emit(Event::StageStatusUpdate {
        run_id: book.run.run_id.clone(),
        stage_id: failed_id,
        status: StageStatus::Pending,
    });
    sink.emit_run_status(book);
}

/// Discards all per-run state and returns to idle.
pub fn reset_run(book: &mut RunBook, sink: &EventSink) {
    *book = RunBook::default();
    sink.patch(|snapshot| *snapshot = RunSnapshot::default());
    sink.emit(Event::RunReset);
}
