//! # er-protocol
//!
//! Core protocol definitions and data models for ecl-runner.
//!
//! This crate defines all shared data structures used for:
//! - Stage, log line and run state models shared by the core and front ends
//! - Configuration file parsing (`config.toml`, stage registry YAML)
//! - Wire payloads exchanged with the Run Tracking Service
//! - Commands and events between a front end and the run controller
//!
//! ## Modules
//!
//! - [`stage_models`]: Pipeline stages and their lifecycle status
//! - [`log_models`]: Log lines and their severity levels
//! - [`run_models`]: Run configuration, run state and snapshots
//! - [`config_models`]: Global configuration from config.toml
//! - [`api_models`]: Run Tracking Service request and response bodies
//! - [`ipc`]: Operations and Events for front end / core communication
//!
//! ## Design Principles
//!
//! - Minimal dependencies: Only serde, ts-rs and thiserror
//! - TypeScript generation: UI-facing types derive `TS` for the browser dashboard
//! - Independent compilation: No dependencies on other ecl-runner crates

pub mod api_models;
pub mod config_models;
pub mod ipc;
pub mod log_models;
pub mod run_models;
pub mod stage_models;

// Re-export all public types for convenience
pub use api_models::*;
pub use config_models::*;
pub use ipc::*;
pub use log_models::*;
pub use run_models::*;
pub use stage_models::*;
