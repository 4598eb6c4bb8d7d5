//! CLI Config Subcommands

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use signalforge_config::{
    config_file_path, load_config, redact_config, validate, write_config, SignalForgeConfig,
};

use crate::context::AppContext;
use crate::terminal_output::{note_error, note_info, note_success, note_warn};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective config (env overrides and defaults applied, credentials masked)
    Show,
    /// Validate config.yaml without running anything
    Check,
    /// Write a default config.yaml
    Init {
        /// Overwrite an existing file (a backup is kept)
        #[arg(long)]
        force: bool,
    },
}

pub async fn run(cmd: ConfigCommands, config_dir: &Path) -> Result<()> {
    let path = config_file_path(config_dir);
    match cmd {
        ConfigCommands::Show => {
            let ctx = AppContext::load(config_dir).await?;
            let yaml = serde_yaml::to_string(&redact_config(&ctx.config))?;
            println!("# {}", ctx.config_path.display());
            print!("{yaml}");
        }
        ConfigCommands::Check => {
            let report = validate(&load_config(&path).await?);
            for warning in &report.warnings {
                note_warn(&format!("{}: {}", warning.path, warning.message));
            }
            for error in &report.errors {
                note_error(&format!("{}: {}", error.path, error.message));
            }
            if !report.is_valid() {
                anyhow::bail!("{} has {} error(s)", path.display(), report.errors.len());
            }
            note_success(&format!("{} is valid", path.display()));
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                note_info(&format!("{} already exists; use --force to overwrite", path.display()));
                return Ok(());
            }
            write_config(&SignalForgeConfig::default(), &path).await?;
            note_success(&format!("Wrote {}", path.display()));
        }
    }
    Ok(())
}
