mod cache_cmd;
mod config_cmd;
mod context;
mod pipeline;
mod report_cmd;
mod sources;
mod status_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signalforge_logging::{init_console_logger, init_logger};
use signalforge_scheduler::CycleOutcome;
use tracing::{info, warn};

use cache_cmd::CacheCommands;
use config_cmd::ConfigCommands;
use context::AppContext;
use report_cmd::ReportCommands;
use terminal_output::{note_success, note_warn};

#[derive(Parser)]
#[command(name = "signalforge")]
#[command(about = "signalforge: daily signal collection, deltas, and anomaly reports")]
#[command(version)]
struct Cli {
    /// Config directory (default: $SIGNALFORGE_CONFIG_DIR, then ~/.signalforge)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily heartbeat loop until interrupted
    Run {
        /// Run one cycle immediately before waiting for the scheduled hour
        #[arg(long)]
        now: bool,
    },
    /// Run a single locked cycle now and exit
    Once,
    /// Show run state, lock holder, and next run time
    Status,
    /// Inspect or clean the source cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Inspect saved reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Show, check, or initialise config.yaml
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.unwrap_or_else(signalforge_config::config_dir);

    match cli.command {
        Commands::Run { now } => {
            let ctx = AppContext::load(&config_dir).await?;
            init_logger(&ctx.paths.log_dir, ctx.config.log_level())?;
            run_loop(&ctx, now).await?;
        }
        Commands::Once => {
            let ctx = AppContext::load(&config_dir).await?;
            init_logger(&ctx.paths.log_dir, ctx.config.log_level())?;
            run_once(&ctx).await?;
        }
        Commands::Status => {
            init_console_logger("warn");
            status_cmd::run(&AppContext::load(&config_dir).await?).await?;
        }
        Commands::Cache { command } => {
            init_console_logger("info");
            cache_cmd::run(command, &AppContext::load(&config_dir).await?).await?;
        }
        Commands::Report { command } => {
            init_console_logger("warn");
            report_cmd::run(command, &AppContext::load(&config_dir).await?).await?;
        }
        Commands::Config { command } => {
            init_console_logger("warn");
            config_cmd::run(command, &config_dir).await?;
        }
    }

    Ok(())
}

async fn run_loop(ctx: &AppContext, now: bool) -> Result<()> {
    let pipeline = ctx.pipeline()?;
    let scheduler = ctx.scheduler(now);
    info!(
        config = %ctx.config_path.display(),
        data_dir = %ctx.paths.data_dir.display(),
        sources = ctx.config.sources.len(),
        "Starting signalforge"
    );

    // Dropping an in-flight cycle releases the lock through its guard.
    tokio::select! {
        result = scheduler.run_forever(&pipeline) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; shutting down");
            Ok(())
        }
    }
}

async fn run_once(ctx: &AppContext) -> Result<()> {
    let pipeline = ctx.pipeline()?;
    match ctx.scheduler(false).run_cycle(&pipeline).await? {
        CycleOutcome::Skipped { holder } => {
            let who = holder
                .map(|pid| format!("pid {pid}"))
                .unwrap_or_else(|| "another process".into());
            note_warn(&format!("Skipped: lock held by {who}"));
        }
        CycleOutcome::Completed { summary, .. } => {
            note_success(&format!("Cycle completed: {}", summary.unwrap_or_default()));
        }
        CycleOutcome::Failed { error } => anyhow::bail!("Cycle failed: {error}"),
    }
    Ok(())
}
