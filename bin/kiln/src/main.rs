//! kiln is a CLI tool to deploy a system of contracts in dependency order, resuming
//! where a previous run stopped.

mod cli;
mod sample;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use cli::{Cli, Command};
use kiln_deploy::{DeploymentReport, Deployer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy {
            config,
            ledger,
            max_parallel,
            unsafe_allow_linking,
        } => {
            let mut deployer = Deployer::load_from_file(&config.config)?;
            if let Some(ledger) = ledger {
                deployer.ledger = std::path::absolute(&ledger)
                    .context(format!("Invalid ledger path {}", ledger.display()))?;
            }
            if let Some(max_parallel) = max_parallel {
                deployer.options.max_parallel = max_parallel;
            }
            deployer.options.unsafe_allow_linking |= unsafe_allow_linking;

            tracing::info!(
                config_path = %config.config.display(),
                ledger_path = %deployer.ledger_path().display(),
                rpc_url = %deployer.network.rpc_url,
                "Loading deployment from config file..."
            );

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after in-flight steps");
                    let _ = cancel_tx.send(true);
                }
            });

            let report = deployer.deploy(Some(cancel_rx)).await?;
            finish(report)
        }

        Command::Plan { config } => {
            let deployer = Deployer::load_from_file(&config.config)?;
            let resolver = deployer
                .artifact_resolver()
                .context("Failed to index contract artifacts")?;
            let plan = deployer.plan(&resolver)?;

            for (idx, step) in plan.iter().enumerate() {
                let deps = if step.dependencies.is_empty() {
                    String::new()
                } else {
                    format!(" (after {})", step.dependencies.join(", "))
                };
                println!("{:>3}. {} [{}]{}", idx + 1, step.name(), step.kind(), deps);
            }
            for edge in plan.wiring() {
                println!("  wire {edge}");
            }
            Ok(())
        }

        Command::Status { config, ledger } => {
            let mut deployer = Deployer::load_from_file(&config.config)?;
            if let Some(ledger) = ledger {
                deployer.ledger = std::path::absolute(&ledger)
                    .context(format!("Invalid ledger path {}", ledger.display()))?;
            }
            println!("{}", deployer.status()?);
            Ok(())
        }

        Command::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, use --force to overwrite it",
                    path.display()
                );
            }
            sample::sample_deployer().save_to_file(&path)?;
            println!("Sample configuration written to {}", path.display());
            Ok(())
        }
    }
}

/// Print the report and turn an unsuccessful run into a non-zero exit.
fn finish(report: DeploymentReport) -> Result<()> {
    println!("{report}");
    match report.failure_summary() {
        Some(summary) => anyhow::bail!("Deployment failed: {summary}"),
        None => Ok(()),
    }
}
