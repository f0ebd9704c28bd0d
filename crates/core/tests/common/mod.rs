//! Common test utilities shared by the integration suites.
//!
//! - Fixtures: fast settings, run configurations, a spawned controller
//!   wired to the offline collaborators
//! - Assertions over recorded events and snapshots

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
