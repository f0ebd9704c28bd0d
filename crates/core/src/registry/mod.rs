//! Stage registries.
//!
//! A registry is the ordered list of stage definitions for one portfolio
//! scope. Two registries exist: the standard one (SME, corporate and mixed
//! selections) and the retail one, used only when the selection is exactly
//! Retail Banking.

use er_protocol::run_models::PortfolioScope;
use er_protocol::stage_models::{Stage, StageDefinition, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Which of the two registries a stage list belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryScope {
    Standard,
    Retail,
}

impl RegistryScope {
    /// Registry used for a scope selection.
    pub fn for_selection(scope: &[PortfolioScope]) -> Self {
        if scope == [PortfolioScope::RetailBanking] {
            RegistryScope::Retail
        } else {
            RegistryScope::Standard
        }
    }
}

impl std::fmt::Display for RegistryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryScope::Standard => f.write_str("standard"),
            RegistryScope::Retail => f.write_str("retail"),
        }
    }
}

/// Contents of a `registries/*.yaml` file.
///
/// ```yaml
/// scope: retail
/// stages:
///   - id: 1
///     label: "Data Collection"
///     job: "ecl_retail_data_collection"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistryFile {
    pub scope: RegistryScope,
    pub stages: Vec<StageDefinition>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{scope} registry has no stages")]
    Empty { scope: RegistryScope },

    #[error("{scope} registry declares stage id {id} more than once")]
    DuplicateId { scope: RegistryScope, id: StageId },

    #[error("{scope} registry lists stage id {id} out of ascending order")]
    OutOfOrder { scope: RegistryScope, id: StageId },
}

const STANDARD_STAGES: &[(&str, &str)] = &[
    ("Data Collection", "ecl_data_collection"),
    ("Data Cleansing", "ecl_data_cleansing"),
    ("Staging 1", "ecl_staging_1"),
    ("Staging 2a", "ecl_staging_2a"),
    ("Staging 2b", "ecl_staging_2b"),
    ("Staging 3", "ecl_staging_3"),
    ("Staging 4", "ecl_staging_4"),
    ("Staging 5", "ecl_staging_5"),
    ("LGD Modeling", "ecl_lgd_modeling"),
    ("EAD Modeling", "ecl_ead_modeling"),
];

const RETAIL_STAGES: &[(&str, &str)] = &[
    ("Data Collection", "ecl_retail_data_collection"),
    ("Data Cleansing", "ecl_retail_data_cleansing"),
    ("Staging 1", "ecl_retail_staging_1"),
    ("Staging 2a", "ecl_retail_staging_2a"),
    ("Staging 2a2", "ecl_retail_staging_2a2"),
    ("Staging 2b", "ecl_retail_staging_2b"),
    ("Staging 2b2", "ecl_retail_staging_2b2"),
    ("Staging 3", "ecl_retail_staging_3"),
    ("Staging 4", "ecl_retail_staging_4"),
    ("Staging 5", "ecl_retail_staging_5"),
    ("LGD Step 1", "ecl_retail_lgd_step_1"),
    ("LGD Step 2", "ecl_retail_lgd_step_2"),
];

fn definitions_from(table: &[(&str, &str)]) -> Vec<StageDefinition> {
    table
        .iter()
        .zip(1..)
        .map(|((label, job), id)| StageDefinition {
            id,
            label: (*label).to_string(),
            job: Some((*job).to_string()),
        })
        .collect()
}

/// The standard and retail stage lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRegistry {
    standard: Vec<StageDefinition>,
    retail: Vec<StageDefinition>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StageRegistry {
    /// The built-in registries: 10 standard stages and 12 retail stages.
    pub fn builtin() -> Self {
        Self {
            standard: definitions_from(STANDARD_STAGES),
            retail: definitions_from(RETAIL_STAGES),
        }
    }

    /// Replaces one scope's stage list after validating it.
    pub fn with_override(mut self, file: RegistryFile) -> Result<Self, RegistryError> {
        validate_definitions(file.scope, &file.stages)?;
        match file.scope {
            RegistryScope::Standard => self.standard = file.stages,
            RegistryScope::Retail => self.retail = file.stages,
        }
        Ok(self)
    }

    pub fn standard(&self) -> &[StageDefinition] {
        &self.standard
    }

    pub fn retail(&self) -> &[StageDefinition] {
        &self.retail
    }

    pub fn definitions(&self, scope: RegistryScope) -> &[StageDefinition] {
        match scope {
            RegistryScope::Standard => &self.standard,
            RegistryScope::Retail => &self.retail,
        }
    }

    /// Definitions that apply to a scope selection.
    pub fn for_selection(&self, scope: &[PortfolioScope]) -> &[StageDefinition] {
        self.definitions(RegistryScope::for_selection(scope))
    }

    /// Fresh pending stages for a scope selection.
    pub fn stages_for(&self, scope: &[PortfolioScope]) -> Vec<Stage> {
        self.for_selection(scope).iter().map(Stage::from).collect()
    }

    /// Job reference declared for `id` in the registry matching `scope`.
    pub fn job_for(&self, scope: &[PortfolioScope], id: StageId) -> Option<&str> {
        self.for_selection(scope)
            .iter()
            .find(|d| d.id == id)
            .and_then(|d| d.job.as_deref())
    }
}

fn validate_definitions(
    scope: RegistryScope,
    stages: &[StageDefinition],
) -> Result<(), RegistryError> {
    if stages.is_empty() {
        return Err(RegistryError::Empty { scope });
    }

    let mut seen = HashSet::new();
    let mut previous: Option<StageId> = None;
    for stage in stages {
        if !seen.insert(stage.id) {
            return Err(RegistryError::DuplicateId {
                scope,
                id: stage.id,
            });
        }
        if previous.is_some_and(|p| stage.id < p) {
            return Err(RegistryError::OutOfOrder {
                scope,
                id: stage.id,
            });
        }
        previous = Some(stage.id);
    }
    Ok(())
}
