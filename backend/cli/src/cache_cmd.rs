//! CLI Cache Subcommands

use anyhow::Result;
use clap::Subcommand;

use crate::context::AppContext;
use crate::terminal_output::{note_info, note_success};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached source namespaces
    Sources,
    /// Remove cached entries for one source, or everything
    Clear {
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Delete expired and unreadable entries
    Sweep,
}

pub async fn run(cmd: CacheCommands, ctx: &AppContext) -> Result<()> {
    let cache = ctx.cache();
    match cmd {
        CacheCommands::Sources => {
            let mut sources = cache.sources().await;
            if sources.is_empty() {
                note_info(&format!("Cache at {} is empty", cache.root().display()));
                return Ok(());
            }
            sources.sort();
            for source in sources {
                println!("  {source}");
            }
        }
        CacheCommands::Clear { source } => {
            cache.clear(source.as_deref()).await?;
            match source {
                Some(source) => note_success(&format!("Cleared cache for '{source}'")),
                None => note_success("Cleared entire cache"),
            }
        }
        CacheCommands::Sweep => {
            let removed = cache.sweep_expired().await?;
            let noun = if removed == 1 { "entry" } else { "entries" };
            note_success(&format!("Removed {removed} expired cache {noun}"));
        }
    }
    Ok(())
}
