//! Stage execution engine.
//!
//! The [`StageRunner`] executes exactly one stage per [`StageRunner::advance`]
//! call. It opens the stage's job stream, decodes the output into log lines,
//! plays them back at display pace, and records the outcome with the Run
//! Tracking Service. Sequencing across stages belongs to the controller.

pub mod decode;

use crate::clients::base::{ApiError, JobTrigger, RunTracker};
use crate::playback::LogPlayback;
use crate::retry::persist;
use crate::state::run::{
    advance_index, append_log, mark_unconfirmed, set_progress, set_stage_status, EventSink,
    RunBook,
};
use decode::{receipt_timestamp, LineDecoder};
use er_protocol::api_models::StepLogEntry;
use er_protocol::config_models::{GlobalConfig, PacingSettings, RetrySettings};
use er_protocol::ipc::Event;
use er_protocol::log_models::{LogLevel, LogLine};
use er_protocol::stage_models::{StageId, StageStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Why a stage failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("stage {0} has no job reference and no default job is configured")]
    MissingJobRef(StageId),

    #[error("{0}")]
    Trigger(ApiError),

    #[error("{0}")]
    Stream(ApiError),

    #[error("no output received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
}

/// Result of one [`StageRunner::advance`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every line was displayed. `confirmed` is false when the completion
    /// could not be recorded remotely.
    Completed { confirmed: bool },
    /// The stage is failed and an error line was appended.
    Failed(StageError),
    /// Cancelled; queued lines were discarded and nothing was recorded.
    Aborted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stage index {index} is out of range for {len} stages")]
pub struct OutOfRange {
    pub index: usize,
    pub len: usize,
}

/// Tunables of the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// `None` disables the idle timeout.
    pub idle_timeout: Option<Duration>,
    pub default_job: Option<String>,
    pub retry: RetrySettings,
    pub pacing: PacingSettings,
}

impl RunnerSettings {
    pub fn from_global(global: &GlobalConfig) -> Self {
        let idle = global.stream.idle_timeout_secs;
        Self {
            idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            default_job: global.default_job.clone(),
            retry: global.persistence.clone(),
            pacing: global.pacing.clone(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_global(&GlobalConfig::default())
    }
}

/// Why the stream side stopped early.
enum StreamEnd {
    Failed(StageError),
    Aborted,
}

pub struct StageRunner {
    tracker: Arc<dyn RunTracker>,
    trigger: Arc<dyn JobTrigger>,
    playback: LogPlayback,
    settings: RunnerSettings,
}

impl StageRunner {
    pub fn new(
        tracker: Arc<dyn RunTracker>,
        trigger: Arc<dyn JobTrigger>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            tracker,
            trigger,
            playback: LogPlayback::new(settings.pacing.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Executes the stage at `index`.
    ///
    /// 1. Marks it processing, locally and remotely (remote failure is a
    ///    warning only).
    /// 2. Streams the job output into the playback buffer while a second
    ///    branch displays it line by line.
    /// 3. Once the stream has ended and every line is displayed, saves the
    ///    stage's lines and records the final status.
    ///
    /// Cancelling `cancel` aborts the stream and discards queued lines
    /// without recording anything remotely.
    pub async fn advance(
        &self,
        book: &mut RunBook,
        index: usize,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, OutOfRange> {
        let Some(stage) = book.stage(index).cloned() else {
            return Err(OutOfRange {
                index,
                len: book.stages.len(),
            });
        };
        let run_id = book.run.run_id.clone();

        tracing::info!(%run_id, stage_id = stage.id, label = %stage.label, "stage started");

        self.playback.reset();
        set_progress(sink, stage.id, 0.0);
        set_stage_status(book, sink, index, StageStatus::Processing);

        if let Err(err) = persist(&self.settings.retry, cancel, "update_step_status", || {
            self.tracker
                .update_step_status(&run_id, stage.id, StageStatus::Processing)
        })
        .await
        {
            if cancel.is_cancelled() {
                return Ok(self.abort(stage.id));
            }
            sink.emit(Event::PersistenceWarning {
                run_id: run_id.clone(),
                stage_id: Some(stage.id),
                reason: format!("{err:#}"),
            });
        }

        let job = stage
            .external_job_ref
            .clone()
            .or_else(|| self.settings.default_job.clone());

        let streamed = match job {
            Some(job) => {
                let (streamed, played) = tokio::join!(
                    self.consume(&job, stage.id, cancel),
                    self.play_back(book, sink, stage.id, cancel),
                );
                if !played {
                    Err(StreamEnd::Aborted)
                } else {
                    streamed
                }
            }
            None => Err(StreamEnd::Failed(StageError::MissingJobRef(stage.id))),
        };

        match streamed {
            Ok(()) => Ok(self.finish(book, index, sink, cancel).await),
            Err(StreamEnd::Aborted) => Ok(self.abort(stage.id)),
            Err(StreamEnd::Failed(error)) => {
                self.fail(book, index, sink, cancel, error.clone()).await;
                Ok(StageOutcome::Failed(error))
            }
        }
    }

    /// Reads the job stream into the playback buffer. Always closes the
    /// buffer before returning.
    async fn consume(
        &self,
        job: &str,
        stage_id: StageId,
        cancel: &CancellationToken,
    ) -> Result<(), StreamEnd> {
        let result = self.read_stream(job, stage_id, cancel).await;
        self.playback.close();
        result
    }

    async fn read_stream(
        &self,
        job: &str,
        stage_id: StageId,
        cancel: &CancellationToken,
    ) -> Result<(), StreamEnd> {
        // A service that never answers the trigger counts as idle too.
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(StreamEnd::Aborted),
            opened = self.within_idle(self.trigger.trigger(job)) => opened
                .and_then(|result| result.map_err(StageError::Trigger))
                .map_err(StreamEnd::Failed)?,
        };
        tracing::debug!(job, stage_id, "job stream opened");

        let mut decoder = LineDecoder::new(stage_id);
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(StreamEnd::Aborted),
                chunk = self.within_idle(stream.next()) => chunk.map_err(StreamEnd::Failed)?,
            };

            match chunk {
                Some(Ok(bytes)) => self.playback.enqueue_all(decoder.push(&bytes)),
                Some(Err(err)) => {
                    // Lines completed before the break still count.
                    self.playback.enqueue_all(decoder.finish());
                    return Err(StreamEnd::Failed(StageError::Stream(err)));
                }
                None => {
                    self.playback.enqueue_all(decoder.finish());
                    tracing::debug!(job, stage_id, "job stream ended");
                    return Ok(());
                }
            }
        }
    }

    /// Runs `fut` under the idle timeout, if one is configured.
    async fn within_idle<T>(&self, fut: impl Future<Output = T>) -> Result<T, StageError> {
        match self.settings.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| StageError::IdleTimeout(limit)),
            None => Ok(fut.await),
        }
    }

    /// Displays queued lines until the buffer is closed and empty.
    ///
    /// Returns false when cancelled.
    async fn play_back(
        &self,
        book: &mut RunBook,
        sink: &EventSink,
        stage_id: StageId,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }

            match self.playback.drain_tick() {
                Some((line, progress)) => {
                    append_log(book, sink, line);
                    set_progress(sink, stage_id, progress);

                    let pause = self.playback.tick_interval();
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None if self.playback.is_drained() => return true,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = self.playback.changed() => {}
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        book: &mut RunBook,
        index: usize,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        let stage_id = book.stages[index].id;
        let run_id = book.run.run_id.clone();

        self.playback.set_progress(100.0);
        set_progress(sink, stage_id, 100.0);

        let hold = Duration::from_millis(self.settings.pacing.completion_hold_ms);
        if !hold.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return self.abort(stage_id),
                _ = tokio::time::sleep(hold) => {}
            }
        }

        let entries: Vec<StepLogEntry> = book.stage_logs(stage_id).map(StepLogEntry::from).collect();
        let saved = persist(&self.settings.retry, cancel, "save_logs", || {
            self.tracker.save_logs(&run_id, stage_id, &entries)
        })
        .await;
        let recorded = match saved {
            Ok(()) => {
                persist(&self.settings.retry, cancel, "update_step_status", || {
                    self.tracker
                        .update_step_status(&run_id, stage_id, StageStatus::Completed)
                })
                .await
            }
            Err(err) => Err(err),
        };
        if cancel.is_cancelled() {
            return self.abort(stage_id);
        }

        set_stage_status(book, sink, index, StageStatus::Completed);
        advance_index(book, sink);

        let confirmed = match recorded {
            Ok(()) => true,
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(%run_id, stage_id, %reason, "stage completion not recorded");
                mark_unconfirmed(book, sink, index, reason);
                false
            }
        };

        tracing::info!(%run_id, stage_id, confirmed, "stage completed");
        StageOutcome::Completed { confirmed }
    }

    async fn fail(
        &self,
        book: &mut RunBook,
        index: usize,
        sink: &EventSink,
        cancel: &CancellationToken,
        error: StageError,
    ) {
        let stage_id = book.stages[index].id;
        let run_id = book.run.run_id.clone();
        tracing::warn!(%run_id, stage_id, %error, "stage failed");

        append_log(
            book,
            sink,
            LogLine {
                stage_id: Some(stage_id),
                timestamp: receipt_timestamp(),
                level: LogLevel::Error,
                message: format!("Stream connection failed: {error}"),
            },
        );
        set_stage_status(book, sink, index, StageStatus::Failed);

        if let Err(err) = persist(&self.settings.retry, cancel, "update_step_status", || {
            self.tracker
                .update_step_status(&run_id, stage_id, StageStatus::Failed)
        })
        .await
        {
            sink.emit(Event::PersistenceWarning {
                run_id: run_id.clone(),
                stage_id: Some(stage_id),
                reason: format!("{err:#}"),
            });
        }
    }

    fn abort(&self, stage_id: StageId) -> StageOutcome {
        let dropped = self.playback.discard();
        tracing::info!(stage_id, dropped, "stage aborted");
        StageOutcome::Aborted
    }
}
