//! `conductor` command line: list agents, build plans and run them.

mod config;

use clap::{Parser, Subcommand};
use conductor_orchestrator::{AuditLog, Orchestrator};
use config::{ConductorConfig, LogFormat, PlanFile};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: multi-agent workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    /// Log filter (overrides RUST_LOG and the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured agents and their status
    Agents,
    /// Build a plan from a plan file and print it
    Plan {
        /// Plan file (TOML with `goal` and `[[tasks]]`)
        file: PathBuf,
    },
    /// Build and execute a plan with the simulated dispatcher
    Run {
        /// Plan file (TOML with `goal` and `[[tasks]]`)
        file: PathBuf,
    },
}

fn init_tracing(cli_level: Option<&str>, config: &ConductorConfig) -> anyhow::Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConductorConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {e}", cli.config.display()))?;
    init_tracing(cli.log_level.as_deref(), &config)?;

    let audit = Arc::new(AuditLog::new(config.audit_dir()));
    let orchestrator = Orchestrator::with_agents(
        config.agents(),
        Arc::new(config.dispatcher()),
        audit.clone(),
    );

    match cli.command {
        Commands::Agents => {
            print_json(&orchestrator.list_agents())?;
        }
        Commands::Plan { file } => {
            let plan_file = PlanFile::load(&file)?;
            let plan = orchestrator
                .create_plan(&plan_file.goal, &plan_file.tasks)
                .await;
            print_json(&plan)?;
        }
        Commands::Run { file } => {
            let plan_file = PlanFile::load(&file)?;
            let plan = orchestrator
                .create_plan(&plan_file.goal, &plan_file.tasks)
                .await;
            info!(plan_id = %plan.id, steps = plan.workflow.len(), "running plan");

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling plan");
                    trigger.cancel();
                }
            });

            let outcome = orchestrator.execute_plan_with_cancel(plan.id, cancel).await;
            audit.flush().await;
            match outcome {
                Ok(result) => print_json(&result)?,
                Err(failure) => {
                    print_json(&failure)?;
                    anyhow::bail!(failure);
                }
            }
        }
    }

    Ok(())
}
