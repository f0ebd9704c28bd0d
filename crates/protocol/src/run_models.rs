//! Run configuration and runtime run state models.

use crate::ipc::ConfirmationKind;
use crate::log_models::LogLine;
use crate::stage_models::{Stage, StageStatus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use ts_rs::TS;

/// Top-level status of a run.
///
/// Idle -> Running -> Completed
///
/// Running -> Failed when a stage fails; Failed -> Running on retry.
/// Cancel and new-run return any state to Idle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// How the runner moves from one stage to the next.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Advance immediately after a stage completes.
    #[default]
    Automated,
    /// Halt before every stage until the user asks for the next one.
    Manual,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Automated => "automated",
            ExecutionMode::Manual => "manual",
        }
    }
}

/// Calculation methodology requested for the run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
pub enum Methodology {
    /// Base-case scenario.
    Base,
    /// Stress-test scenario.
    Stress,
}

impl Methodology {
    pub fn as_str(self) -> &'static str {
        match self {
            Methodology::Base => "base",
            Methodology::Stress => "stress",
        }
    }
}

/// Portfolio segments a run may cover.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
pub enum PortfolioScope {
    #[serde(rename = "Retail Banking")]
    RetailBanking,
    #[serde(rename = "SME / Commercial")]
    SmeCommercial,
    #[serde(rename = "Large Corporate")]
    LargeCorporate,
}

impl PortfolioScope {
    pub fn label(self) -> &'static str {
        match self {
            PortfolioScope::RetailBanking => "Retail Banking",
            PortfolioScope::SmeCommercial => "SME / Commercial",
            PortfolioScope::LargeCorporate => "Large Corporate",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown portfolio scope: {0}")]
pub struct UnknownScope(pub String);

impl FromStr for PortfolioScope {
    type Err = UnknownScope;

    /// Accepts short ids (`retail`, `sme`, `corporate`) and display labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retail" | "retail banking" => Ok(PortfolioScope::RetailBanking),
            "sme" | "sme / commercial" | "commercial" => Ok(PortfolioScope::SmeCommercial),
            "corporate" | "large corporate" => Ok(PortfolioScope::LargeCorporate),
            _ => Err(UnknownScope(s.to_string())),
        }
    }
}

/// User-entered parameters of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct RunConfiguration {
    /// Name of the source system, e.g. `Snowflake_Prod_DW`.
    pub source_system: String,

    /// Snapshot date in `YYYY-MM-DD` form.
    pub snapshot_date: String,

    /// `None` until the user picks one; start is refused without it.
    pub methodology: Option<Methodology>,

    /// Selected portfolio scopes. Retail Banking cannot be mixed with others.
    pub scope: Vec<PortfolioScope>,
}

impl RunConfiguration {
    /// True when the selection is exactly Retail Banking, which uses the
    /// retail stage registry.
    pub fn is_retail_only(&self) -> bool {
        self.scope == [PortfolioScope::RetailBanking]
    }

    /// Scope labels as sent to the Run Tracking Service.
    pub fn scope_labels(&self) -> Vec<String> {
        self.scope.iter().map(|s| s.label().to_string()).collect()
    }
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            source_system: "Snowflake_Prod_DW".to_string(),
            snapshot_date: "2024-03-31".to_string(),
            methodology: Some(Methodology::Base),
            scope: vec![PortfolioScope::RetailBanking],
        }
    }
}

/// Runtime state of the active run. Exactly one instance exists per
/// controller; it is reset to defaults on cancel and new run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, TS)]
pub struct RunState {
    /// Identifier assigned by the Run Tracking Service. Empty when idle.
    pub run_id: String,

    pub status: RunStatus,

    /// Index of the stage being (or about to be) executed. Equals the stage
    /// count once every stage has completed.
    pub current_stage_index: usize,

    /// Seconds spent actively processing stages.
    pub elapsed_seconds: u64,

    pub mode: ExecutionMode,
}

/// Read-only view of everything a front end needs to render a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default, TS)]
pub struct RunSnapshot {
    pub run: RunState,
    pub config: Option<RunConfiguration>,
    pub stages: Vec<Stage>,
    /// Lines already played back, in display order.
    pub logs: Vec<LogLine>,
    /// Progress of the current stage in percent.
    pub progress: f64,
    /// True while the runner is halted waiting for a run-next-stage command.
    pub awaiting_input: bool,
    pub pending_confirmation: Option<ConfirmationKind>,
}

impl RunSnapshot {
    /// Number of stages currently in `status`.
    pub fn count_with_status(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }
}
