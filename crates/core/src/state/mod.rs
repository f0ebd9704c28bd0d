//! Run state management.
//!
//! - [`run`]: the run book and its transitions
//! - [`validation`]: pre-start configuration and stage list checks
//! - [`view`]: state derived from a snapshot for rendering
//! - [`controller`]: the task that owns the run and serialises commands

pub mod controller;
pub mod run;
pub mod validation;
pub mod view;
