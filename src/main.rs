// ABOUTME: CLI entry point for esl-sync
// ABOUTME: Parses commands and drives the poll loop, status, and state reset

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use esl_sync::config::Config;
use esl_sync::daemon;
use esl_sync::runner::Runner;
use esl_sync::sync::{CycleOrchestrator, CycleOutcome, StateStore};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "esl-sync")]
#[command(about = "Point-of-sale to electronic-shelf-label synchronization middleware", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the export directory and synchronize changes continuously
    Run {
        /// Run a single sync cycle and exit
        #[arg(long)]
        once: bool,
        /// Run as a background daemon (detaches from the terminal)
        #[arg(long)]
        daemon: bool,
        /// Stop a running daemon
        #[arg(long)]
        stop: bool,
        /// Show daemon status
        #[arg(long)]
        daemon_status: bool,
    },
    /// Show daemon liveness and the per-source tracking summary
    Status,
    /// Forget tracked state so the next cycle re-detects from scratch
    ResetState {
        /// Reset only this source (table file name)
        #[arg(long)]
        source: Option<String>,
    },
    /// Write a default config.json
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Detach before the runtime exists; worker threads do not survive a fork.
    if let Commands::Run {
        daemon: true,
        stop: false,
        daemon_status: false,
        ..
    } = &cli.command
    {
        daemon::daemonize()?;
    }

    // RUST_LOG wins over --log; default to info
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            once,
            daemon,
            stop,
            daemon_status,
        } => run_command(&cli.config, once, daemon, stop, daemon_status).await,
        Commands::Status => status_command(&cli.config).await,
        Commands::ResetState { source } => reset_state_command(&cli.config, source.as_deref()).await,
        Commands::InitConfig => init_config_command(&cli.config),
    }
}

async fn run_command(
    config_path: &Path,
    once: bool,
    as_daemon: bool,
    stop: bool,
    daemon_status: bool,
) -> Result<()> {
    if stop {
        if daemon::stop_daemon()? {
            println!("Daemon stopped.");
        } else {
            println!("Daemon is not running.");
        }
        return Ok(());
    }
    if daemon_status {
        return daemon::print_status();
    }

    let config = Config::load(config_path)?;
    config.validate()?;
    config.ensure_directories()?;

    let store = Arc::new(StateStore::load(config.state_file.clone()).await);
    let orchestrator = Arc::new(CycleOrchestrator::new(config.clone(), store));

    if once {
        match orchestrator.run_cycle().await? {
            CycleOutcome::Completed(stats) => {
                println!(
                    "Cycle complete: {} source(s), {} new, {} updated, {} deleted, {} file(s) written",
                    stats.sources_processed,
                    stats.new_records,
                    stats.updated_records,
                    stats.deleted_records,
                    stats.files_written,
                );
                if !stats.is_success() {
                    anyhow::bail!("cycle completed with {} error(s)", stats.errors.len());
                }
            }
            CycleOutcome::Skipped => println!("Cycle skipped: another cycle is running."),
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let runner = Runner::new(config, orchestrator);
    let result = runner.run(shutdown_rx).await;
    if as_daemon {
        let _ = daemon::cleanup();
    }
    result
}

async fn status_command(config_path: &Path) -> Result<()> {
    let status = daemon::check_status()?;
    if status.running {
        println!("Daemon: RUNNING (PID {})", status.pid.unwrap_or(0));
    } else {
        println!("Daemon: NOT RUNNING");
    }

    let config = Config::load(config_path)?;
    let store = StateStore::load(config.state_file.clone()).await;
    let summaries = store.summaries().await;
    if summaries.is_empty() {
        println!("No sources tracked yet.");
        return Ok(());
    }
    println!("Tracked sources:");
    for summary in summaries {
        let last = summary
            .last_processed
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {}: {} record(s) tracked ({} deleted), last processed {}",
            summary.source_id, summary.tracked, summary.deleted, last
        );
    }
    Ok(())
}

async fn reset_state_command(config_path: &Path, source: Option<&str>) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::load(config.state_file.clone()).await;
    store.reset(source).await?;
    match source {
        Some(id) => println!("Tracking state reset for {}.", id),
        None => println!("Tracking state reset for all sources."),
    }
    Ok(())
}

fn init_config_command(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("Configuration already exists at {:?}", config_path);
    }
    Config::default().save(config_path)?;
    println!("Default configuration written to {:?}", config_path);
    Ok(())
}
