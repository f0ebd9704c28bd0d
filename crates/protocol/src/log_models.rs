//! Log line models.

use crate::stage_models::StageId;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Severity of a log line, derived from its message text.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Process,
    Success,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Process => "PROCESS",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single line of job output.
///
/// Lines are append-only: once created they are never mutated, and they are
/// kept in arrival order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct LogLine {
    /// Stage that produced the line. `None` means "the current stage".
    #[serde(default)]
    pub stage_id: Option<StageId>,

    /// Wall clock time of receipt, formatted `HH:MM:SS`.
    pub timestamp: String,

    pub level: LogLevel,

    pub message: String,
}
