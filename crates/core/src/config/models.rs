//! Configuration models that aggregate all settings.

use crate::registry::StageRegistry;
use er_protocol::config_models::GlobalConfig;

/// Unified application configuration loaded from the `.ecl-runner/`
/// directory.
///
/// - `config.toml`: Global settings
/// - `registries/*.yaml`: Stage registry overrides
///
/// # Example
///
/// ```rust,no_run
/// use er_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("API at {}", config.global.api.base_url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Global settings from `config.toml`.
    pub global: GlobalConfig,

    /// Built-in stage registry with any file overrides applied.
    pub registry: StageRegistry,
}
