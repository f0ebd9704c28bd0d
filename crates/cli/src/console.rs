//! Interactive follow loop: prints events, reads commands from stdin and
//! turns Ctrl-C into a cancel request.

use crate::render;
use color_eyre::Result;
use er_core::state::controller::RunHandle;
use er_core::state::view;
use er_protocol::ipc::{ConfirmationKind, Event, Op};
use er_protocol::run_models::{RunSnapshot, RunStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;

const HELP: &str = "commands: <Enter>/next, cancel, retry, new, yes, no, quit";

/// How the follow loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
    /// The user quit, or the controller went away.
    Stopped,
}

/// Maps one line of user input to a command.
pub fn parse_command(line: &str) -> Option<Op> {
    let op = match line.trim().to_lowercase().as_str() {
        "" | "next" | "n" => Op::RunNextStage,
        "cancel" | "c" => Op::RequestCancel,
        "retry" | "r" => Op::RequestRetry,
        "new" => Op::RequestNewRun,
        "yes" | "y" => Op::Confirm,
        "no" => Op::Dismiss,
        "quit" | "q" => Op::Shutdown,
        _ => return None,
    };
    Some(op)
}

/// Outcome when the user leaves while the run is in `snapshot`'s state.
fn outcome_on_exit(snapshot: &RunSnapshot) -> Outcome {
    match snapshot.run.status {
        RunStatus::Completed => Outcome::Completed,
        RunStatus::Failed => Outcome::Failed,
        RunStatus::Idle | RunStatus::Running => Outcome::Stopped,
    }
}

/// The controller is idle until the user types something.
fn waiting_on_user(snapshot: &RunSnapshot) -> bool {
    snapshot.awaiting_input
        || snapshot.pending_confirmation.is_some()
        || snapshot.run.status == RunStatus::Failed
}

pub struct Console {
    json: bool,
    auto_confirm: bool,
}

impl Console {
    pub fn new(json: bool, auto_confirm: bool) -> Self {
        Self { json, auto_confirm }
    }

    fn print(&self, event: &Event, snapshot: &RunSnapshot) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
        } else if let Some(text) = render::render_event(event, snapshot) {
            println!("{text}");
        }
        Ok(())
    }

    /// Follows the run until it reaches a final state or the user quits.
    pub async fn follow(
        &self,
        handle: &RunHandle,
        mut events: UnboundedReceiver<Event>,
    ) -> Result<Outcome> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(Outcome::Stopped);
                    };
                    let snapshot = handle.snapshot();
                    self.print(&event, &snapshot)?;

                    match event {
                        Event::RunCompleted { .. } => return Ok(Outcome::Completed),
                        Event::RunCancelled { .. } => return Ok(Outcome::Cancelled),
                        Event::StartFailed { .. } => return Ok(Outcome::Failed),
                        Event::ConfirmationRequired { .. } if self.auto_confirm => {
                            handle.send(Op::Confirm).await?;
                        }
                        Event::RunFailed { .. } if !stdin_open => return Ok(Outcome::Failed),
                        Event::AwaitingInput { .. } if !stdin_open => {
                            return Ok(Outcome::Stopped);
                        }
                        _ => {}
                    }
                }
                line = lines.next_line(), if stdin_open => {
                    match line? {
                        Some(line) => match parse_command(&line) {
                            Some(Op::Shutdown) => return Ok(outcome_on_exit(&handle.snapshot())),
                            Some(op) => handle.send(op).await?,
                            None => eprintln!("{HELP}"),
                        },
                        None => {
                            tracing::debug!("stdin closed");
                            stdin_open = false;
                            let snapshot = handle.snapshot();
                            if waiting_on_user(&snapshot) {
                                return Ok(outcome_on_exit(&snapshot));
                            }
                        }
                    }
                }
                interrupted = signal::ctrl_c() => {
                    interrupted?;
                    let snapshot = handle.snapshot();
                    if snapshot.pending_confirmation == Some(ConfirmationKind::Cancel) {
                        handle.send(Op::Confirm).await?;
                    } else if view::can_cancel(&snapshot) {
                        eprintln!("Ctrl-C again to cancel the run");
                        handle.send(Op::RequestCancel).await?;
                    } else {
                        return Ok(outcome_on_exit(&snapshot));
                    }
                }
            }
        }
    }
}
