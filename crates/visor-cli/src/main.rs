//! Thin smoke-test harness over the check execution engine: load a YAML
//! catalog, build a manual trigger, run it, and print the NDJSON event
//! stream to stdout followed by the final result summary. Not the CLI front
//! door for Visor (that stays out of scope) — just enough of a binary to
//! exercise the library end to end, the way the teacher ships `tandem-engine`
//! as a thin bin over its crates.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use visor_config::load_from_path;
use visor_engine::bus::FrontendHost;
use visor_engine::Engine;
use visor_frontends::NdjsonFrontend;
use visor_types::result::RunStatus;
use visor_types::trigger::{CheckSelection, RepositoryCoordinates, RunTrigger};

#[derive(Parser, Debug)]
#[command(name = "visor")]
#[command(about = "Run a check catalog through the engine once and print the event stream")]
struct Cli {
    /// Path to a YAML config file (spec §6.6 shape: checks/max_parallelism/...).
    #[arg(long)]
    config: String,

    /// Run only these checks (by name); defaults to the full requested set.
    #[arg(long = "check")]
    checks: Vec<String>,

    #[arg(long, default_value = "local")]
    owner: String,

    #[arg(long, default_value = "workspace")]
    repo: String,

    #[arg(long, default_value = "cli")]
    actor: String,

    #[arg(long, default_value = "run-1")]
    run_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = load_from_path(&cli.config)
        .await
        .with_context(|| format!("loading config from {}", cli.config))?;
    let checks = if cli.checks.is_empty() {
        CheckSelection::All
    } else {
        CheckSelection::Named(cli.checks.clone())
    };
    let options = config.to_run_options(checks);
    let (catalog, declared_order) = config.into_catalog().context("resolving check catalog")?;

    let engine = Engine::new(catalog, declared_order)
        .with_frontends(FrontendHost::new(vec![Arc::new(NdjsonFrontend::stdout())]));

    let trigger = RunTrigger::manual(
        RepositoryCoordinates {
            owner: cli.owner,
            name: cli.repo,
            default_branch: None,
        },
        cli.actor,
    );

    info!(run_id = %cli.run_id, "starting run");
    let result = engine.run(cli.run_id, trigger, options).await;

    eprintln!("{}", serde_json::to_string_pretty(&result)?);

    Ok(match result.status {
        Some(RunStatus::Ok) => ExitCode::from(0),
        Some(RunStatus::Failed) => ExitCode::from(1),
        Some(RunStatus::Error) | None => ExitCode::from(2),
    })
}
