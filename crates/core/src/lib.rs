//! # er-core
//!
//! Stage runner, log playback and run lifecycle control for ecl-runner.
//!
//! This crate provides:
//! - Configuration loading from the `.ecl-runner/` directory
//! - Built-in and file-provided stage registries
//! - Clients for the Run Tracking and Job Trigger services, plus offline fakes
//! - The paced log playback buffer and the sequential stage runner
//! - The run lifecycle controller that owns all run state
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`registry`]: Stage definitions per portfolio scope
//! - [`clients`]: Collaborator traits and their HTTP / in-memory adapters
//! - [`playback`]: FIFO buffer that paces log display
//! - [`engine`]: Stage runner and stream decoding
//! - [`state`]: Run state transitions, validation and the controller

pub mod clients;
pub mod config;
pub mod engine;
pub mod playback;
pub mod registry;
pub mod state;

mod retry;
