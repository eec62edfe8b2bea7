use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::backend::EngineBackend;
use crate::config::Config;
use crate::engine::PostgresFrontend;
use crate::logging;
use crate::plugin;
use crate::service::{PluginSet, Service};
use crate::worker::{Backend, Worker};

#[derive(Parser)]
#[command(name = "starflow")]
#[command(about = "Starflow - durable workflows written as scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides STARFLOW_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Engine location (overrides config file and env vars)
    #[arg(long, global = true)]
    pub location: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a worker with the built-in plugins until Ctrl-C
    Worker {
        /// Task list to poll
        #[arg(short = 't', long = "task-list")]
        task_list: Option<String>,
    },

    /// Create or upgrade the PostgreSQL schema
    Migrate,

    /// Print the effective configuration
    Config,
}

pub async fn run_cli() -> Result<()> {
    run_cli_with_args(Cli::parse()).await
}

pub async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let task_list = match &cli.command {
        Commands::Worker { task_list } => task_list.clone(),
        _ => None,
    };
    let config = Config::builder()
        .config_path(cli.config)
        .location(cli.location)
        .task_list(task_list)
        .build()
        .context("Failed to load configuration")?;
    logging::init(&config.logging.filter);

    match cli.command {
        Commands::Worker { .. } => run_worker(config).await,
        Commands::Migrate => migrate(&config).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

async fn run_worker(config: Config) -> Result<()> {
    let backend = EngineBackend::new(config.backend_options());
    let mut worker = backend
        .engine_worker(&config.worker.location, &config.worker.domain, &config.worker.task_list)
        .with_context(|| format!("Failed to create worker for {}", config.worker.location))?;

    let plugins = PluginSet::new(plugin::builtin()).context("Failed to assemble plugins")?;
    Service::new(plugins, backend.workflow())
        .register(&mut worker)
        .context("Failed to register workflows")?;

    tracing::info!(
        location = %config.worker.location,
        domain = %config.worker.domain,
        task_list = %config.worker.task_list,
        workflows = ?worker.workflow_names(),
        activities = ?worker.activity_names(),
        "starting worker"
    );

    let stop = CancellationToken::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
        }
        signal.cancel();
    });

    worker.run(stop).await?;
    tracing::info!("worker stopped");
    Ok(())
}

async fn migrate(config: &Config) -> Result<()> {
    let location = &config.worker.location;
    if !(location.starts_with("postgres://") || location.starts_with("postgresql://")) {
        anyhow::bail!("migrate needs a postgres:// location, got {}", location);
    }
    let frontend = PostgresFrontend::connect_lazy(location, config.worker.max_connections)
        .context("Failed to create database pool")?;
    frontend.migrate().await?;
    tracing::info!("migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_flags() {
        let cli = Cli::try_parse_from(["starflow", "--location", "memory://x", "worker", "-t", "payments"]).unwrap();
        assert_eq!(cli.location.as_deref(), Some("memory://x"));
        match cli.command {
            Commands::Worker { task_list } => assert_eq!(task_list.as_deref(), Some("payments")),
            _ => panic!("expected worker command"),
        }
    }

    #[tokio::test]
    async fn test_migrate_rejects_memory_location() {
        let config = Config::builder().location(Some("memory://x".into())).build().unwrap();
        assert!(migrate(&config).await.is_err());
    }
}
