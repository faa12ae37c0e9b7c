//! Flowline Daemon - workflow runtime host
//!
//! The daemon:
//! - Publishes the workflow definitions found in a directory at startup
//! - Runs the recurring SLA sweep (breaches, reminders, escalations)
//! - Validates definition files from the command line

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowline_engine::{LogNotificationSender, SlaScheduler, WorkflowEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod definitions;
mod error;

use crate::config::{DaemonConfig, StorageConfig};

/// Flowline Daemon CLI
#[derive(Parser)]
#[command(name = "flowlined")]
#[command(about = "Flowline Daemon - workflow runtime and SLA sweeper", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLOWLINE_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "FLOWLINE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "FLOWLINE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load definitions and run the SLA sweep until interrupted
    Run {
        /// Directory of `*.json` definitions to publish at startup
        #[arg(short, long)]
        definitions: Option<PathBuf>,
    },
    /// Validate a definition file and print the result
    Validate {
        /// Definition file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match cli.command.unwrap_or(Command::Run { definitions: None }) {
        Command::Validate { file } => validate(&file),
        Command::Run { definitions } => run(config, definitions).await,
    }
}

fn validate(file: &std::path::Path) -> anyhow::Result<()> {
    let definition = definitions::read_definition(file)?;
    let result = flowline_engine::validate_definition(&definition, &definition.constraints);
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.valid {
        anyhow::bail!(
            "{} is invalid: {} error(s)",
            file.display(),
            result.errors.len()
        );
    }
    Ok(())
}

async fn run(config: DaemonConfig, definitions_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let engine = match config.storage {
        StorageConfig::Memory => WorkflowEngine::in_memory(config.engine.clone()),
    }
    .with_notifier(Arc::new(LogNotificationSender));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?config.storage,
        sweep_interval_secs = config.engine.sla.sweep_interval_secs,
        "Flowline daemon starting"
    );

    if let Some(dir) = definitions_dir.or(config.definitions_dir) {
        let summary = definitions::load_definitions(&engine, &dir)
            .await
            .with_context(|| format!("loading definitions from {}", dir.display()))?;
        tracing::info!(
            published = summary.published.len(),
            rejected = summary.rejected.len(),
            "Definitions loaded"
        );
    }

    SlaScheduler::new(engine)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    tracing::info!("Flowline daemon stopped");
    Ok(())
}
