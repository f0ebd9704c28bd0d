//! Pipeline stage models.
//!
//! A stage is one discrete unit of pipeline work. Stages are executed strictly
//! in order; each one triggers a single external job and owns the log lines
//! that job produced.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Identifier of a stage within a run. Stable for the lifetime of the run.
pub type StageId = u32;

/// Lifecycle status of a single stage.
///
/// Permitted transitions:
/// Pending -> Processing -> Completed | Failed
///
/// Failed -> Pending happens only through an explicit retry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Stage has not started yet.
    #[serde(alias = "PENDING")]
    Pending,

    /// Stage job is running and its log stream is open.
    #[serde(alias = "PROCESSING", alias = "RUNNING", alias = "running")]
    Processing,

    /// Stage finished and every log line has been displayed.
    #[serde(alias = "COMPLETED", alias = "SUCCESS", alias = "success")]
    Completed,

    /// Stage job or its stream failed.
    #[serde(alias = "FAILED")]
    Failed,
}

impl StageStatus {
    /// Wire representation used in status update bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::Processing)
                | (StageStatus::Processing, StageStatus::Completed)
                | (StageStatus::Processing, StageStatus::Failed)
                | (StageStatus::Failed, StageStatus::Pending)
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage as tracked during a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct Stage {
    /// Unique, ordered identifier.
    pub id: StageId,

    /// Human readable name, e.g. "Staging 2b".
    pub label: String,

    /// Current status.
    pub status: StageStatus,

    /// Identifier of the external job triggered for this stage.
    #[serde(default)]
    pub external_job_ref: Option<String>,

    /// False when the stage completed locally but the Run Tracking Service
    /// never acknowledged it.
    #[serde(default = "default_confirmed")]
    pub confirmed: bool,
}

fn default_confirmed() -> bool {
    true
}

impl Stage {
    /// Create a pending stage.
    pub fn new(id: StageId, label: impl Into<String>, external_job_ref: Option<String>) -> Self {
        Self {
            id,
            label: label.into(),
            status: StageStatus::Pending,
            external_job_ref,
            confirmed: true,
        }
    }
}

/// Static stage definition as declared in a stage registry.
///
/// # Example
///
/// ```yaml
/// - id: 5
///   label: "Staging 2b"
///   job: "ecl_staging_2b"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct StageDefinition {
    pub id: StageId,
    pub label: String,
    #[serde(default)]
    pub job: Option<String>,
}

impl From<&StageDefinition> for Stage {
    fn from(definition: &StageDefinition) -> Self {
        Stage::new(definition.id, definition.label.clone(), definition.job.clone())
    }
}
