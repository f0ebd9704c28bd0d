//! Command line arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use er_protocol::config_models::GlobalConfig;
use er_protocol::run_models::{ExecutionMode, Methodology, PortfolioScope, RunConfiguration};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ecl-run", version, about = "Run the ECL pipeline stage by stage")]
pub struct Cli {
    /// Directory containing `.ecl-runner/`.
    #[arg(long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Debug logging on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a run and follow it until it completes, fails or is cancelled.
    Run(RunArgs),
    /// List the stages a scope selection runs.
    Stages(StagesArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodologyArg {
    Base,
    Stress,
}

impl From<MethodologyArg> for Methodology {
    fn from(arg: MethodologyArg) -> Self {
        match arg {
            MethodologyArg::Base => Methodology::Base,
            MethodologyArg::Stress => Methodology::Stress,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, default_value = "Snowflake_Prod_DW")]
    pub source: String,

    /// Snapshot date, YYYY-MM-DD.
    #[arg(long, default_value = "2024-03-31")]
    pub snapshot_date: String,

    #[arg(long, value_enum, default_value_t = MethodologyArg::Base)]
    pub methodology: MethodologyArg,

    /// Portfolio scope (`retail`, `sme`, `corporate`); repeatable.
    /// Defaults to retail.
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<PortfolioScope>,

    /// Halt before every stage until Enter is pressed.
    #[arg(long)]
    pub manual: bool,

    /// Use the in-memory tracking service and simulated job output.
    #[arg(long)]
    pub offline: bool,

    /// Delay between simulated output lines with `--offline`.
    #[arg(long, default_value_t = 150)]
    pub line_delay_ms: u64,

    /// Run Tracking / Job Trigger base URL.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bearer token; prefer ECL_RUNNER_TOKEN.
    #[arg(long)]
    pub token: Option<String>,

    /// Print every event as a JSON line instead of coloured text.
    #[arg(long)]
    pub json: bool,

    /// Confirm cancel, retry and new-run requests without asking.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl RunArgs {
    pub fn mode(&self) -> ExecutionMode {
        if self.manual {
            ExecutionMode::Manual
        } else {
            ExecutionMode::Automated
        }
    }

    pub fn run_configuration(&self) -> RunConfiguration {
        let scope = if self.scopes.is_empty() {
            vec![PortfolioScope::RetailBanking]
        } else {
            let mut scope = Vec::new();
            for s in &self.scopes {
                if !scope.contains(s) {
                    scope.push(*s);
                }
            }
            scope
        };
        RunConfiguration {
            source_system: self.source.clone(),
            snapshot_date: self.snapshot_date.clone(),
            methodology: Some(self.methodology.into()),
            scope,
        }
    }

    /// Flags take precedence over `config.toml` and the environment.
    pub fn apply_overrides(&self, global: &mut GlobalConfig) {
        if let Some(url) = self.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            global.api.base_url = url.trim().to_string();
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) {
            global.api.token = Some(token.trim().to_string());
        }
    }
}

#[derive(Args, Debug)]
pub struct StagesArgs {
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<PortfolioScope>,

    #[arg(long)]
    pub json: bool,
}
