//! Turns controller events into terminal lines.

use colored::{ColoredString, Colorize};
use er_core::state::view;
use er_protocol::ipc::{ConfirmationKind, Event};
use er_protocol::log_models::{LogLevel, LogLine};
use er_protocol::run_models::RunSnapshot;
use er_protocol::stage_models::{Stage, StageId, StageStatus};

fn paint_level(level: LogLevel) -> ColoredString {
    let text = format!("{:<7}", level.as_str());
    match level {
        LogLevel::Info => text.normal(),
        LogLevel::Process => text.cyan(),
        LogLevel::Success => text.green(),
        LogLevel::Warn => text.yellow(),
        LogLevel::Error => text.red().bold(),
    }
}

fn paint_status(status: StageStatus) -> ColoredString {
    match status {
        StageStatus::Pending => status.as_str().dimmed(),
        StageStatus::Processing => status.as_str().cyan(),
        StageStatus::Completed => status.as_str().green(),
        StageStatus::Failed => status.as_str().red().bold(),
    }
}

fn stage_name(snapshot: &RunSnapshot, stage_id: StageId) -> String {
    match view::stage_label(snapshot, stage_id) {
        Some(label) => format!("Stage {stage_id} ({label})"),
        None => format!("Stage {stage_id}"),
    }
}

pub fn log_line(line: &LogLine) -> String {
    format!(
        "{} {} {}",
        line.timestamp.dimmed(),
        paint_level(line.level),
        line.message
    )
}

pub fn confirmation_question(action: ConfirmationKind) -> &'static str {
    match action {
        ConfirmationKind::Cancel => "Cancel the run and discard its progress?",
        ConfirmationKind::Retry => "Retry the failed stage?",
        ConfirmationKind::NewRun => "Leave this run and start over?",
    }
}

/// Text for one event, or `None` for events that are not printed
/// (progress and elapsed ticks).
pub fn render_event(event: &Event, snapshot: &RunSnapshot) -> Option<String> {
    let text = match event {
        Event::RunStarted {
            run_id,
            stage_count,
            mode,
        } => format!(
            "{} {run_id}: {stage_count} stages, {} mode",
            "Run started".bold(),
            mode.as_str()
        ),
        Event::StageStatusUpdate {
            stage_id, status, ..
        } => {
            if *status == StageStatus::Pending {
                return None;
            }
            format!("── {} {}", stage_name(snapshot, *stage_id), paint_status(*status))
        }
        Event::LogAppended { line, .. } => log_line(line),
        Event::AwaitingInput { next_stage, .. } => match next_stage {
            Some(stage_id) => format!(
                "{} press Enter to run {}",
                "Paused:".yellow().bold(),
                stage_name(snapshot, *stage_id)
            ),
            None => format!(
                "{} press Enter to report completion",
                "All stages done:".yellow().bold()
            ),
        },
        Event::ConfirmationRequired { action } => {
            format!("{} [y/N]", confirmation_question(*action).yellow().bold())
        }
        Event::StageUnconfirmed {
            stage_id, reason, ..
        } => format!(
            "{} {} completed but was not recorded: {reason}",
            "warning:".yellow().bold(),
            stage_name(snapshot, *stage_id)
        ),
        Event::PersistenceWarning {
            stage_id, reason, ..
        } => match stage_id {
            Some(stage_id) => format!(
                "{} could not record {}: {reason}",
                "warning:".yellow().bold(),
                stage_name(snapshot, *stage_id)
            ),
            None => format!("{} could not record the run: {reason}", "warning:".yellow().bold()),
        },
        Event::RunCompleted { run_id } => format!(
            "{} {run_id} in {}s",
            "Run completed".green().bold(),
            snapshot.run.elapsed_seconds
        ),
        Event::RunFailed {
            stage_id, error, ..
        } => format!(
            "{} at {}: {error} (type `retry` or `quit`)",
            "Run failed".red().bold(),
            stage_name(snapshot, *stage_id)
        ),
        Event::RunCancelled { run_id } => format!("{} {run_id}", "Run cancelled".yellow().bold()),
        Event::StartFailed { error } => {
            format!("{} {error}", "Could not start run:".red().bold())
        }
        Event::CommandRejected { reason, .. } => format!("{} {reason}", "ignored:".dimmed()),
        Event::RunStatusUpdate { .. }
        | Event::ProgressUpdate { .. }
        | Event::ElapsedTick { .. }
        | Event::RunReset => return None,
    };
    Some(text)
}

/// One row of the `stages` listing: id, label and the job it triggers.
pub fn stage_row(stage: &Stage, default_job: Option<&str>) -> String {
    let job = match (stage.external_job_ref.as_deref(), default_job) {
        (Some(job), _) => job.to_string(),
        (None, Some(job)) => format!("{job} (default)"),
        (None, None) => "(no job)".to_string(),
    };
    format!("{:>3}  {:<28} {job}", stage.id, stage.label)
}

/// One line summary of a finished run.
pub fn summary(snapshot: &RunSnapshot) -> String {
    let warnings = view::filter_logs(snapshot, "", Some(LogLevel::Warn)).len();
    let errors = view::filter_logs(snapshot, "", Some(LogLevel::Error)).len();
    format!(
        "{}/{} stages completed, {} lines, {warnings} warnings, {errors} errors",
        snapshot.count_with_status(StageStatus::Completed),
        snapshot.stages.len(),
        snapshot.logs.len(),
    )
}
