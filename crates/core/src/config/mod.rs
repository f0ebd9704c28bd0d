//! Configuration loading and management.
//!
//! This module loads `config.toml` and the stage registry overrides from the
//! `.ecl-runner/` directory.

pub mod error;
pub mod loader;
pub mod models;
