//! Simulated Job Trigger Service.
//!
//! Streams scripted output per job id, one line per `line_delay`, each line
//! stamped `[HH:MM:SS] ` the way the real service does. Scripts can also
//! split lines across chunks, break the stream, refuse the trigger or keep
//! the stream open forever.

use crate::clients::base::{ApiError, ByteStream, JobTrigger};
use crate::registry::StageRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use er_protocol::run_models::RunConfiguration;
use er_protocol::stage_models::StageDefinition;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Output produced for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobScript {
    /// Emit every line, then end the stream.
    Lines(Vec<String>),
    /// Emit raw chunks as-is (no stamping, no newline added).
    Chunks(Vec<Bytes>),
    /// Emit `lines`, then break the stream with `error`.
    FailAfter { lines: Vec<String>, error: String },
    /// Refuse the trigger with HTTP 500 and this message.
    Unavailable(String),
    /// Emit `lines`, then keep the stream open without further output.
    Hang(Vec<String>),
    /// Accept the trigger but never answer it.
    Unresponsive,
}

impl JobScript {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JobScript::Lines(lines.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug)]
pub struct SimulatedJobTrigger {
    scripts: Mutex<HashMap<String, JobScript>>,
    fallback: Option<JobScript>,
    line_delay: Duration,
    triggered: Mutex<Vec<String>>,
}

impl SimulatedJobTrigger {
    pub fn new(line_delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: None,
            line_delay,
            triggered: Mutex::new(Vec::new()),
        }
    }

    /// Script used for job ids without an explicit script.
    pub fn with_fallback(mut self, script: JobScript) -> Self {
        self.fallback = Some(script);
        self
    }

    pub fn with_script(self, job_id: impl Into<String>, script: JobScript) -> Self {
        self.set_script(job_id, script);
        self
    }

    /// Replaces a job's script; takes effect on the next trigger.
    pub fn set_script(&self, job_id: impl Into<String>, script: JobScript) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.into(), script);
    }

    /// Job ids triggered so far, in order.
    pub fn triggered(&self) -> Vec<String> {
        self.triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Demo output for every stage a configuration will run.
    pub fn ecl_demo(registry: &StageRegistry, config: &RunConfiguration, line_delay: Duration) -> Self {
        let trigger = Self::new(line_delay).with_fallback(JobScript::lines([
            "INFO Starting job...",
            "PROCESS Executing tasks...",
            "SUCCESS Job completed.",
        ]));
        for definition in registry.for_selection(&config.scope) {
            if let Some(job) = &definition.job {
                trigger.set_script(job.clone(), JobScript::Lines(demo_lines(definition, config)));
            }
        }
        trigger
    }
}

fn demo_lines(definition: &StageDefinition, config: &RunConfiguration) -> Vec<String> {
    let mut lines = vec![format!("INFO Initializing {}...", definition.label)];
    match definition.label.as_str() {
        "Data Collection" => {
            lines.push(format!("INFO Initiating connection to {}...", config.source_system));
            lines.push("SUCCESS Connection established. Latency: 42ms.".to_string());
            lines.push(format!("INFO Querying partition: {}...", config.snapshot_date));
            lines.push("PROCESS Fetching records...".to_string());
        }
        "Data Cleansing" => {
            lines.push("INFO Standardizing column headers to snake_case...".to_string());
            lines.push("PROCESS Validating data types...".to_string());
            lines.push("WARN Found 3 deprecated columns, dropping...".to_string());
        }
        "Staging 2b" => {
            lines.push("PROCESS Calculating key financial ratios (EBITDA, Leverage)...".to_string());
            lines.push("WARN Restated financials found for 15 entities.".to_string());
        }
        "LGD Modeling" | "LGD Step 1" | "LGD Step 2" => {
            lines.push("PROCESS Calibrating LGD for downturn scenarios...".to_string());
        }
        "EAD Modeling" => {
            lines.push("PROCESS Applying off-balance sheet conversion factors...".to_string());
        }
        _ => {
            lines.push(format!(
                "PROCESS Executing {}...",
                definition.job.as_deref().unwrap_or("job")
            ));
        }
    }
    lines.push(format!("SUCCESS {} completed.", definition.label));
    lines
}

fn stamp(line: &str) -> Bytes {
    Bytes::from(format!(
        "[{}] {}\n",
        chrono::Local::now().format("%H:%M:%S"),
        line
    ))
}

#[async_trait]
impl JobTrigger for SimulatedJobTrigger {
    async fn trigger(&self, job_id: &str) -> Result<ByteStream, ApiError> {
        self.triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job_id.to_string());

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| ApiError::Http {
                status: 404,
                message: format!("Unknown DAG {job_id}"),
            })?;

        let delay = self.line_delay;
        let (lines, chunks, error, hang) = match script {
            JobScript::Unavailable(message) => {
                return Err(ApiError::Http {
                    status: 500,
                    message,
                })
            }
            JobScript::Unresponsive => return std::future::pending().await,
            JobScript::Lines(lines) => (lines, Vec::new(), None, false),
            JobScript::Chunks(chunks) => (Vec::new(), chunks, None, false),
            JobScript::FailAfter { lines, error } => (lines, Vec::new(), Some(error), false),
            JobScript::Hang(lines) => (lines, Vec::new(), None, true),
        };

        let stream = async_stream::stream! {
            for line in lines {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(stamp(&line));
            }
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            if let Some(error) = error {
                yield Err(ApiError::Transport(error));
            }
            if hang {
                std::future::pending::<()>().await;
            }
        };
        Ok(Box::pin(stream))
    }
}
