//! Pre-start checks for a run configuration and the stage list returned by
//! the Run Tracking Service.

use crate::registry::StageRegistry;
use chrono::NaiveDate;
use er_protocol::api_models::ExecutionDetails;
use er_protocol::config_models::SourceSystem;
use er_protocol::run_models::{PortfolioScope, RunConfiguration};
use er_protocol::stage_models::{Stage, StageId};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Select at least one portfolio scope")]
    NoScope,

    #[error("Retail Banking cannot be combined with other scopes")]
    MixedRetailScope,

    #[error("Select a methodology")]
    NoMethodology,

    #[error("Invalid snapshot date '{0}', expected YYYY-MM-DD")]
    InvalidSnapshotDate(String),

    #[error("Unknown source system '{0}'")]
    UnknownSource(String),

    #[error("Source system '{0}' is offline")]
    SourceOffline(String),

    #[error("Run has no stages")]
    NoStages,

    #[error("Run lists stage id {0} more than once")]
    DuplicateStage(StageId),
}

/// Checks a configuration before a run is started.
pub fn validate_config(
    config: &RunConfiguration,
    sources: &[SourceSystem],
) -> Result<(), ValidationError> {
    if config.scope.is_empty() {
        return Err(ValidationError::NoScope);
    }
    if config.scope.len() > 1 && config.scope.contains(&PortfolioScope::RetailBanking) {
        return Err(ValidationError::MixedRetailScope);
    }
    if config.methodology.is_none() {
        return Err(ValidationError::NoMethodology);
    }
    if NaiveDate::parse_from_str(&config.snapshot_date, "%Y-%m-%d").is_err() {
        return Err(ValidationError::InvalidSnapshotDate(
            config.snapshot_date.clone(),
        ));
    }

    let source = sources
        .iter()
        .find(|s| s.name == config.source_system)
        .ok_or_else(|| ValidationError::UnknownSource(config.source_system.clone()))?;
    if !source.online {
        return Err(ValidationError::SourceOffline(source.name.clone()));
    }
    Ok(())
}

/// Turns the service's stage list into pending stages.
///
/// Steps without a job reference take the one the registry declares for the
/// same id; the caller falls back to the default job after that.
pub fn stages_from_details(
    details: ExecutionDetails,
    registry: &StageRegistry,
    scope: &[PortfolioScope],
) -> Result<Vec<Stage>, ValidationError> {
    if details.steps.is_empty() {
        return Err(ValidationError::NoStages);
    }

    let mut seen = HashSet::new();
    details
        .steps
        .into_iter()
        .map(|step| {
            if !seen.insert(step.step_id) {
                return Err(ValidationError::DuplicateStage(step.step_id));
            }
            let job = step
                .dag_id
                .filter(|d| !d.trim().is_empty())
                .or_else(|| registry.job_for(scope, step.step_id).map(str::to_string));
            Ok(Stage::new(step.step_id, step.step_name, job))
        })
        .collect()
}
