//! `shipyard`: release pipeline orchestrator CLI.
//!
//! Runs named release goals (`package`, `check-packages`, `build-image`, ...)
//! as a task graph. Every failure is reported once, here, with a stable exit
//! code from [`shipyard::exit_codes`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shipyard::core::env::FinalizedEnvironment;
use shipyard::error::ConfigurationError;
use shipyard::exit_codes;
use shipyard::goals::Components;
use shipyard::io::config::{CONFIG_FILE, ShipyardConfig, load_config};
use shipyard::io::environment::{Overrides, RunKind, finalize, user_env_path};
use shipyard::io::process::{ProcessRunner, SystemRunner};
use shipyard::lifecycle::LifecycleCoordinator;
use shipyard::logging;

#[derive(Parser)]
#[command(
    name = "shipyard",
    version,
    about = "Release pipeline orchestrator with package install checks"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Command>,

    /// Goals to run, in order.
    goals: Vec<String>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (defaults to `<root>/shipyard.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the task plan without running anything.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Treat this run as automated regardless of the CI marker.
    #[arg(long, global = true, conflicts_with = "manual")]
    automated: bool,

    /// Treat this run as manual regardless of the CI marker.
    #[arg(long, global = true)]
    manual: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the available goals.
    List,
    /// Print the finalized environment (secrets masked).
    Env,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = match cli.global.root.clone() {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(|| root.join(CONFIG_FILE));
    let cfg = load_config(&config_path)?;
    cfg.validate()?;

    match cli.command {
        Some(Command::List) => cmd_list(&cfg, &root),
        Some(Command::Env) => {
            let env = resolve_environment(&cli.global, &cfg, &root)?;
            print!("{}", env.render(true));
            Ok(())
        }
        None => cmd_run(&cli.global, &cfg, &root, &cli.goals),
    }
}

fn run_kind(global: &GlobalArgs) -> RunKind {
    if global.automated {
        RunKind::Automated
    } else if global.manual {
        RunKind::Manual
    } else {
        RunKind::Detect
    }
}

fn resolve_environment(
    global: &GlobalArgs,
    cfg: &ShipyardConfig,
    root: &Path,
) -> Result<FinalizedEnvironment> {
    let user_env = user_env_path(root, cfg);
    let overrides = Overrides::collect(std::env::vars(), user_env.as_deref())?;
    finalize(cfg, overrides, run_kind(global))
}

fn system_runner(cfg: &ShipyardConfig, env: Arc<FinalizedEnvironment>) -> Arc<dyn ProcessRunner> {
    Arc::new(SystemRunner::new(
        env,
        cfg.timeout(),
        cfg.process.output_limit_bytes,
    ))
}

/// Goal listing needs no resolved environment: no action runs.
fn cmd_list(cfg: &ShipyardConfig, root: &Path) -> Result<()> {
    let env = Arc::new(FinalizedEnvironment::default());
    let components = Components::new(system_runner(cfg, env.clone()), cfg, root, env)?;
    let coordinator = LifecycleCoordinator::new(&components)?;
    for (name, description) in coordinator.graph().describe() {
        println!("{name:<28} {description}");
    }
    Ok(())
}

fn cmd_run(
    global: &GlobalArgs,
    cfg: &ShipyardConfig,
    root: &Path,
    goals: &[String],
) -> Result<()> {
    if goals.is_empty() {
        return Err(ConfigurationError::Invalid(
            "no goals given (see `shipyard list`)".to_string(),
        )
        .into());
    }
    let env = Arc::new(resolve_environment(global, cfg, root)?);
    let components = Components::new(system_runner(cfg, env.clone()), cfg, root, env)?;
    let coordinator = LifecycleCoordinator::new(&components)?;
    let goals: Vec<&str> = goals.iter().map(String::as_str).collect();

    if global.dry_run {
        let kind = if coordinator.is_automated() {
            "automated"
        } else {
            "manual"
        };
        println!("plan ({kind} run):");
        for (position, task) in coordinator.plan(&goals)?.iter().enumerate() {
            println!("  {}. {task}", position + 1);
        }
        return Ok(());
    }

    let summary = coordinator.run(&goals)?;
    println!("shipyard: {} task(s) completed", summary.executed.len());
    Ok(())
}
