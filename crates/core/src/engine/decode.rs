//! Newline-delimited job output decoding.

use er_protocol::log_models::{LogLevel, LogLine};
use er_protocol::stage_models::StageId;

const ERROR_KEYWORDS: &[&str] = &["ERROR", "FAIL", "CRITICAL", "EXCEPTION"];
const WARN_KEYWORDS: &[&str] = &["WARN"];
const SUCCESS_KEYWORDS: &[&str] = &["SUCCESS", "COMPLETED"];
const PROCESS_KEYWORDS: &[&str] = &["PROCESS", "STARTING", "EXECUTING", "INIT"];

/// Severity of a line by case-insensitive keyword scan, first match wins in
/// the order ERROR, WARN, SUCCESS, PROCESS.
pub fn classify(text: &str) -> LogLevel {
    let upper = text.to_uppercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| upper.contains(k));

    if contains_any(ERROR_KEYWORDS) {
        LogLevel::Error
    } else if contains_any(WARN_KEYWORDS) {
        LogLevel::Warn
    } else if contains_any(SUCCESS_KEYWORDS) {
        LogLevel::Success
    } else if contains_any(PROCESS_KEYWORDS) {
        LogLevel::Process
    } else {
        LogLevel::Info
    }
}

/// Drops a leading `[...] ` timestamp prefix.
pub fn strip_timestamp(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let after = &rest[end + 1..];
            if after.starts_with(char::is_whitespace) {
                return after.trim_start();
            }
        }
    }
    text
}

/// Wall clock time used to stamp received lines.
pub fn receipt_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Builds a [`LogLine`] from one line of job output, or `None` for blank
/// lines. The level is classified on the raw text, prefix included.
pub fn parse_line(stage_id: StageId, raw: &str) -> Option<LogLine> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(LogLine {
        stage_id: Some(stage_id),
        timestamp: receipt_timestamp(),
        level: classify(trimmed),
        message: strip_timestamp(trimmed).to_string(),
    })
}

/// Reassembles lines split across chunks.
#[derive(Debug)]
pub struct LineDecoder {
    stage_id: StageId,
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new(stage_id: StageId) -> Self {
        Self {
            stage_id,
            pending: Vec::new(),
        }
    }

    /// Consumes a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogLine> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let text = String::from_utf8_lossy(&self.pending[start..end]);
            if let Some(line) = parse_line(self.stage_id, &text) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Emits the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<LogLine> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(self.stage_id, &String::from_utf8_lossy(&rest))
    }
}
