//! Global configuration models for `.ecl-runner/config.toml`.
//!
//! This module defines the structure of the global configuration file that
//! controls how the runner reaches its collaborators and paces its output.
//! Every section is optional; missing values fall back to defaults.

use serde::Deserialize;
use serde::Serialize;
use ts_rs::TS;

/// Represents global settings from `.ecl-runner/config.toml`.
///
/// # Example
///
/// ```toml
/// # .ecl-runner/config.toml
/// default-job = "random_stage_and_message_dag"
///
/// [api]
/// base-url = "http://localhost:5000/api/v1"
/// request-timeout-secs = 30
///
/// [stream]
/// idle-timeout-secs = 120
///
/// [pacing]
/// mode = "fixed"
/// fixed-interval-ms = 30
///
/// [[sources]]
/// name = "Oracle_Legacy_DB"
/// online = false
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "kebab-case", default)]
pub struct GlobalConfig {
    pub api: ApiSettings,
    pub stream: StreamSettings,
    pub pacing: PacingSettings,
    pub persistence: RetrySettings,

    /// Job triggered for stages that carry no job reference of their own.
    pub default_job: Option<String>,

    /// Known source systems and whether they are reachable.
    pub sources: Vec<SourceSystem>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            stream: StreamSettings::default(),
            pacing: PacingSettings::default(),
            persistence: RetrySettings::default(),
            default_job: None,
            sources: vec![
                SourceSystem::new("Snowflake_Prod_DW", true),
                SourceSystem::new("Oracle_Legacy_DB", false),
                SourceSystem::new("S3_DataLake", true),
            ],
        }
    }
}

/// Connection settings shared by the Run Tracking and Job Trigger clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApiSettings {
    pub base_url: String,

    /// Bearer credential. Usually supplied via `ECL_RUNNER_TOKEN` instead.
    pub token: Option<String>,

    pub connect_timeout_secs: u64,

    /// Applies to JSON calls only; job streams are bounded by the stream
    /// idle timeout instead.
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/v1".to_string(),
            token: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case", default)]
pub struct StreamSettings {
    /// Maximum silence between two chunks before the stream is treated as
    /// failed. `0` disables the timeout.
    pub idle_timeout_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 120,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    /// Tick faster when the backlog grows.
    #[default]
    Adaptive,
    /// Tick at `fixed-interval-ms` regardless of backlog.
    Fixed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case", default)]
pub struct PacingSettings {
    pub mode: PacingMode,
    pub fixed_interval_ms: u64,
    /// Pause after a stage reaches 100% before it is marked completed.
    pub completion_hold_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            mode: PacingMode::Adaptive,
            fixed_interval_ms: 30,
            completion_hold_ms: 500,
        }
    }
}

/// Bounded exponential backoff for calls to the Run Tracking Service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct SourceSystem {
    pub name: String,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

impl SourceSystem {
    pub fn new(name: impl Into<String>, online: bool) -> Self {
        Self {
            name: name.into(),
            online,
        }
    }
}
