//! Test fixtures: settings without delays and a controller harness.

use er_core::clients::adapters::{JobScript, OfflineRunTracker, SimulatedJobTrigger};
use er_core::config::models::AppConfig;
use er_core::registry::StageRegistry;
use er_core::state::controller::{RunController, RunHandle};
use er_protocol::config_models::{GlobalConfig, PacingMode, PacingSettings, RetrySettings};
use er_protocol::ipc::Event;
use er_protocol::run_models::{PortfolioScope, RunConfiguration, RunSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for any wait in the integration suites.
pub const WAIT_LIMIT: Duration = Duration::from_secs(30);

/// Global settings with no pacing delay, no completion hold, no idle
/// timeout and millisecond backoff.
#[allow(dead_code)]
pub fn fast_global() -> GlobalConfig {
    let mut global = GlobalConfig::default();
    global.stream.idle_timeout_secs = 0;
    global.pacing = PacingSettings {
        mode: PacingMode::Fixed,
        fixed_interval_ms: 0,
        completion_hold_ms: 0,
    };
    global.persistence = RetrySettings {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 2,
    };
    global
}

#[allow(dead_code)]
pub fn fast_app_config() -> AppConfig {
    AppConfig {
        global: fast_global(),
        registry: StageRegistry::builtin(),
    }
}

/// A selection that uses the 10-stage standard registry.
#[allow(dead_code)]
pub fn standard_run() -> RunConfiguration {
    RunConfiguration {
        scope: vec![PortfolioScope::LargeCorporate, PortfolioScope::SmeCommercial],
        ..RunConfiguration::default()
    }
}

/// A selection that uses the 12-stage retail registry.
#[allow(dead_code)]
pub fn retail_run() -> RunConfiguration {
    RunConfiguration {
        scope: vec![PortfolioScope::RetailBanking],
        ..RunConfiguration::default()
    }
}

/// Three-line job output ending in success.
#[allow(dead_code)]
pub fn quick_lines() -> JobScript {
    JobScript::lines(["INFO start", "PROCESS Executing tasks", "SUCCESS done"])
}

/// A trigger answering every job with [`quick_lines`].
#[allow(dead_code)]
pub fn quick_trigger() -> SimulatedJobTrigger {
    SimulatedJobTrigger::new(Duration::ZERO).with_fallback(quick_lines())
}

/// A spawned controller plus handles on its offline collaborators.
pub struct Harness {
    pub handle: RunHandle,
    pub events: UnboundedReceiver<Event>,
    pub tracker: Arc<OfflineRunTracker>,
    pub trigger: Arc<SimulatedJobTrigger>,
    /// Every event taken off `events` so far.
    pub seen: Vec<Event>,
}

#[allow(dead_code)]
pub fn spawn_offline(trigger: SimulatedJobTrigger) -> Harness {
    spawn_with(fast_app_config(), trigger)
}

#[allow(dead_code)]
pub fn spawn_with(config: AppConfig, trigger: SimulatedJobTrigger) -> Harness {
    let tracker = Arc::new(OfflineRunTracker::new(config.registry.clone()));
    let trigger = Arc::new(trigger);
    let (handle, events) = RunController::spawn(tracker.clone(), trigger.clone(), &config);
    Harness {
        handle,
        events,
        tracker,
        trigger,
        seen: Vec::new(),
    }
}

#[allow(dead_code)]
impl Harness {
    /// Waits for a snapshot matching `predicate`, panicking after
    /// [`WAIT_LIMIT`].
    pub async fn wait_until<F>(&self, predicate: F) -> RunSnapshot
    where
        F: FnMut(&RunSnapshot) -> bool,
    {
        tokio::time::timeout(WAIT_LIMIT, self.handle.wait_until(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("controller stopped")
    }

    /// Takes events until one matches `predicate` and returns it.
    pub async fn next_event<F>(&mut self, mut predicate: F) -> Event
    where
        F: FnMut(&Event) -> bool,
    {
        loop {
            let event = tokio::time::timeout(WAIT_LIMIT, self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            self.seen.push(event.clone());
            if predicate(&event) {
                return event;
            }
        }
    }

    /// Takes every event that is already queued.
    pub fn drain_events(&mut self) -> &[Event] {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    pub fn run_id(&self) -> String {
        self.handle.snapshot().run.run_id
    }
}

/// A project directory with `.ecl-runner/config.toml` and a three-stage
/// retail registry override.
#[allow(dead_code)]
pub fn create_test_project() -> std::io::Result<TempDir> {
    let temp_dir = tempfile::tempdir()?;
    let er_dir = temp_dir.path().join(".ecl-runner");
    std::fs::create_dir_all(er_dir.join("registries"))?;

    std::fs::write(
        er_dir.join("config.toml"),
        r#"
default-job = "ecl_generic"

[stream]
idle-timeout-secs = 0

[pacing]
mode = "fixed"
fixed-interval-ms = 0
completion-hold-ms = 0

[persistence]
max-attempts = 2
initial-delay-ms = 1
max-delay-ms = 2

[[sources]]
name = "Snowflake_Prod_DW"

[[sources]]
name = "Teradata_Archive"
online = false
"#,
    )?;

    std::fs::write(
        er_dir.join("registries/retail.yaml"),
        r#"
scope: retail
stages:
  - id: 1
    label: "Data Collection"
    job: "retail_collect"
  - id: 2
    label: "Data Cleansing"
  - id: 3
    label: "Staging 1"
    job: "retail_stage_1"
"#,
    )?;

    Ok(temp_dir)
}
