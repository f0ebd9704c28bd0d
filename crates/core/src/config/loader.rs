//! Configuration file loader for the `.ecl-runner/` directory.
//!
//! This module loads:
//! - `config.toml`: Global settings
//! - `registries/*.yaml`: Stage registry overrides, one scope per file
//!
//! Environment variables are applied on top of the file values.

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use crate::registry::{RegistryFile, StageRegistry};
use er_protocol::config_models::GlobalConfig;
use std::path::Path;
use walkdir::WalkDir;

/// Overrides `api.token`.
pub const TOKEN_ENV: &str = "ECL_RUNNER_TOKEN";

/// Overrides `api.base-url`.
pub const BASE_URL_ENV: &str = "ECL_RUNNER_BASE_URL";

/// Loads all configuration from the `.ecl-runner/` directory under `root`.
///
/// Missing directories and files fall back to defaults: the built-in stage
/// registries and [`GlobalConfig::default`].
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - Files exist but cannot be read
/// - Files have invalid TOML or YAML syntax
/// - A registry file declares an empty, duplicated or unordered stage list
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let er_dir = root.join(".ecl-runner");

    let mut global = if er_dir.exists() {
        load_global_config(&er_dir)?
    } else {
        GlobalConfig::default()
    };
    apply_env_overrides(&mut global, |key| std::env::var(key).ok());

    let registry = if er_dir.exists() {
        load_registries(&er_dir)?
    } else {
        StageRegistry::builtin()
    };

    tracing::debug!(
        base_url = %global.api.base_url,
        standard_stages = registry.standard().len(),
        retail_stages = registry.retail().len(),
        "configuration loaded"
    );

    Ok(AppConfig { global, registry })
}

/// Applies environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(global: &mut GlobalConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = lookup(TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
        global.api.token = Some(token);
    }
    if let Some(base_url) = lookup(BASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
        global.api.base_url = base_url;
    }
}

fn load_global_config(er_dir: &Path) -> ConfigResult<GlobalConfig> {
    let config_path = er_dir.join("config.toml");

    if !config_path.exists() {
        return Ok(GlobalConfig::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let config: GlobalConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    if config.api.base_url.trim().is_empty() {
        return Err(ConfigError::InvalidConfig {
            path: config_path,
            reason: "api.base-url must not be empty".to_string(),
        });
    }

    Ok(config)
}

/// Applies every `registries/*.yaml` file on top of the built-in registry.
fn load_registries(er_dir: &Path) -> ConfigResult<StageRegistry> {
    let registries_dir = er_dir.join("registries");
    let mut registry = StageRegistry::builtin();

    if !registries_dir.exists() {
        return Ok(registry);
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(&registries_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| ConfigError::DirectoryWalk {
            path: registries_dir.clone(),
            source,
        })?;

        let path = entry.path();
        let ext = path.extension().and_then(|s| s.to_str());
        if ext != Some("yaml") && ext != Some("yml") {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    // Later files win; keep the order stable across platforms.
    paths.sort();

    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;

        let file: RegistryFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                path: path.clone(),
                source,
            })?;

        registry = registry
            .with_override(file)
            .map_err(|source| ConfigError::Registry { path, source })?;
    }

    Ok(registry)
}
