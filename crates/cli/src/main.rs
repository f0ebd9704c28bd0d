mod args;
mod console;
mod render;
mod telemetry;

use args::{Cli, Command, RunArgs, StagesArgs};
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use console::{Console, Outcome};
use er_core::clients::adapters::{OfflineRunTracker, SimulatedJobTrigger};
use er_core::clients::http::{HttpJobTrigger, HttpRunTracker};
use er_core::clients::{JobTrigger, RunTracker};
use er_core::config::loader::load_config;
use er_core::config::models::AppConfig;
use er_core::state::controller::RunController;
use er_protocol::ipc::Op;
use er_protocol::run_models::PortfolioScope;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let config = load_config(&cli.project).await?;
    match cli.command {
        Command::Stages(args) => print_stages(&config, &args),
        Command::Run(args) => run(config, args).await,
    }
}

fn print_stages(config: &AppConfig, args: &StagesArgs) -> Result<()> {
    let scope = if args.scopes.is_empty() {
        vec![PortfolioScope::RetailBanking]
    } else {
        args.scopes.clone()
    };
    let stages = config.registry.stages_for(&scope);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stages)?);
        return Ok(());
    }
    let default_job = config.global.default_job.as_deref();
    for stage in &stages {
        println!("{}", render::stage_row(stage, default_job));
    }
    Ok(())
}

async fn run(mut config: AppConfig, args: RunArgs) -> Result<()> {
    args.apply_overrides(&mut config.global);
    let run_config = args.run_configuration();

    let (tracker, trigger): (Arc<dyn RunTracker>, Arc<dyn JobTrigger>) = if args.offline {
        let line_delay = Duration::from_millis(args.line_delay_ms);
        (
            Arc::new(OfflineRunTracker::new(config.registry.clone())),
            Arc::new(SimulatedJobTrigger::ecl_demo(
                &config.registry,
                &run_config,
                line_delay,
            )),
        )
    } else {
        (
            Arc::new(HttpRunTracker::new(&config.global.api)?),
            Arc::new(HttpJobTrigger::new(&config.global.api)?),
        )
    };
    tracing::debug!(offline = args.offline, base_url = %config.global.api.base_url, "collaborators ready");

    let (handle, events) = RunController::spawn(tracker, trigger, &config);
    handle
        .send(Op::StartRun {
            config: run_config,
            mode: args.mode(),
        })
        .await?;

    let outcome = Console::new(args.json, args.yes)
        .follow(&handle, events)
        .await;
    let snapshot = handle.snapshot();
    handle.shutdown().await?;
    let outcome = outcome?;

    if matches!(outcome, Outcome::Completed | Outcome::Failed) && !snapshot.stages.is_empty() {
        eprintln!("{}", render::summary(&snapshot));
    }
    match outcome {
        Outcome::Completed | Outcome::Stopped => Ok(()),
        Outcome::Failed => Err(eyre!("run failed")),
        Outcome::Cancelled => Err(eyre!("run cancelled")),
    }
}
