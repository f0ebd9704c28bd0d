//! In-memory collaborators.

pub mod offline_tracker;
pub mod simulated_trigger;

pub use offline_tracker::{CallKind, OfflineRunTracker, TrackerCall};
pub use simulated_trigger::{JobScript, SimulatedJobTrigger};
