//! Log playback buffer.
//!
//! Job output arrives in bursts; the buffer decouples arrival from display.
//! The producer side ([`LogPlayback::enqueue`]) never blocks. The consumer
//! pops one line per tick ([`LogPlayback::drain_tick`]) and sleeps for
//! [`LogPlayback::tick_interval`], which shrinks as the backlog grows.
//!
//! Once the producer calls [`LogPlayback::close`] and the queue is empty the
//! buffer is drained. Waiters are woken through a [`Notify`] on every enqueue
//! and on close, so nobody polls.

use er_protocol::config_models::{PacingMode, PacingSettings};
use er_protocol::log_models::LogLine;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Progress never passes this value until the stage completes.
pub const PROGRESS_CEILING: f64 = 95.0;

/// Display interval for a given backlog.
pub fn adaptive_interval(backlog: usize) -> Duration {
    let millis = match backlog {
        n if n > 50 => 5,
        n if n > 20 => 15,
        n if n > 5 => 25,
        _ => 40,
    };
    Duration::from_millis(millis)
}

/// Progress after one more line is displayed.
///
/// Moves toward [`PROGRESS_CEILING`] by 5% of the remaining distance, at
/// least 0.1 points per line.
pub fn next_progress(current: f64) -> f64 {
    if current >= PROGRESS_CEILING {
        return current.max(PROGRESS_CEILING);
    }
    let remaining = PROGRESS_CEILING - current;
    (current + (remaining * 0.05).max(0.1)).min(PROGRESS_CEILING)
}

#[derive(Debug, Default)]
struct PlaybackState {
    queue: VecDeque<LogLine>,
    progress: f64,
    closed: bool,
}

#[derive(Debug)]
pub struct LogPlayback {
    state: Mutex<PlaybackState>,
    notify: Notify,
    pacing: PacingSettings,
}

impl LogPlayback {
    pub fn new(pacing: PacingSettings) -> Self {
        Self {
            state: Mutex::new(PlaybackState::default()),
            notify: Notify::new(),
            pacing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pacing(&self) -> &PacingSettings {
        &self.pacing
    }

    /// Appends a line to the back of the queue.
    pub fn enqueue(&self, line: LogLine) {
        self.lock().queue.push_back(line);
        self.notify.notify_one();
    }

    pub fn enqueue_all<I>(&self, lines: I)
    where
        I: IntoIterator<Item = LogLine>,
    {
        let added = {
            let mut state = self.lock();
            let before = state.queue.len();
            state.queue.extend(lines);
            state.queue.len() - before
        };
        if added > 0 {
            self.notify.notify_one();
        }
    }

    /// Pops the oldest line and advances progress.
    ///
    /// Returns the line together with the new progress value, or `None` when
    /// the queue is empty.
    pub fn drain_tick(&self) -> Option<(LogLine, f64)> {
        let mut state = self.lock();
        let line = state.queue.pop_front()?;
        state.progress = next_progress(state.progress);
        Some((line, state.progress))
    }

    /// Delay before the next [`drain_tick`](Self::drain_tick).
    pub fn tick_interval(&self) -> Duration {
        match self.pacing.mode {
            PacingMode::Adaptive => adaptive_interval(self.backlog()),
            PacingMode::Fixed => Duration::from_millis(self.pacing.fixed_interval_ms),
        }
    }

    /// Marks the producer side as finished.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    /// Prepares the buffer for a new stage.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.queue.clear();
        state.progress = 0.0;
        state.closed = false;
    }

    /// Drops every queued line and returns how many were dropped.
    pub fn discard(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        dropped
    }

    pub fn set_progress(&self, progress: f64) {
        self.lock().progress = progress;
    }

    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn backlog(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closed and empty.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed && state.queue.is_empty()
    }

    /// Resolves after the next enqueue or close. A wakeup that happened
    /// while nobody was waiting is kept, so checking state and then awaiting
    /// this never misses one.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}
