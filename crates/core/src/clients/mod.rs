//! Collaborator clients.
//!
//! The runner talks to two remote services through the traits in [`base`]:
//! the Run Tracking Service, which owns run and step records, and the Job
//! Trigger Service, which starts a stage's job and streams its output.
//!
//! [`http`] implements both over HTTP; [`adapters`] holds in-memory
//! versions used by `--offline` runs and tests.

pub mod adapters;
pub mod base;
pub mod http;

pub use base::{ApiError, ByteStream, JobTrigger, RunTracker};
