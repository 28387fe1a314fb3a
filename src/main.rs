mod child;
mod classify;
mod cli;
mod config;
mod logging;
mod probe;
mod readiness;
mod supervisor;

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use crate::{
    child::LaunchPlan, classify::Verdict, cli::Cli, config::SupervisorConfig,
    supervisor::Supervisor,
};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_tracing();
    let cli = Cli::parse();
    let config = SupervisorConfig::from_env(cli.port, cli.readiness_timeout);
    let plan = LaunchPlan::resolve(config.host, config.port);

    let supervisor = Supervisor::new(config, plan);
    let verdict = supervisor.run().await;
    info!(verdict = verdict.as_str(), "supervisor run complete");

    match verdict {
        Verdict::Neutral => ExitCode::SUCCESS,
        Verdict::Failure => ExitCode::FAILURE,
    }
}
