//! CLI Status Command
//!
//! Reports persisted run state, the current lock holder, and the next run time.

use anyhow::Result;
use chrono::{Duration, Utc};
use signalforge_scheduler::{duration_until_next_run, load_state, OsProcessProbe, ProcessProbe};

use crate::context::AppContext;
use crate::terminal_output::{note_warn, render_table, styled, Column, DIM, GREEN, RED};

pub async fn run(ctx: &AppContext) -> Result<()> {
    let loaded = load_state(&ctx.paths.state_file).await;
    let state = loaded.state();

    println!("\nsignalforge status ({})\n", ctx.config_path.display());
    if let Some(reason) = loaded.default_reason() {
        note_warn(&format!("Run state defaulted: {reason}"));
    }

    let never = || styled(DIM, "never");
    let last_run = state
        .last_run_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(never);
    let outcome = match state.last_outcome.as_deref() {
        Some("ok") => styled(GREEN, "ok"),
        Some(other) => styled(RED, other),
        None => never(),
    };

    let lock = ctx.lock();
    let holder = match lock.current_holder() {
        Some(pid) if OsProcessProbe.is_alive(pid) => format!("pid {pid} (running)"),
        Some(pid) => format!("pid {pid} (stale)"),
        None if lock.path().exists() => "unknown owner".to_string(),
        None => "free".to_string(),
    };

    let now = Utc::now();
    let wait = duration_until_next_run(now, ctx.config.heartbeat.hour_utc);
    let next_run = now + Duration::seconds(wait.as_secs() as i64);

    let mut rows = vec![
        row("Last run", last_run),
        row("Last outcome", outcome),
        row("Cycles", state.cycle_count.to_string()),
        row("Reports written", state.total_reports.to_string()),
        row("Consecutive failures", state.consecutive_failures.to_string()),
        row("Lock", holder),
        row(
            "Next run",
            format!(
                "{} (in {}h {}m)",
                next_run.format("%Y-%m-%d %H:00 UTC"),
                wait.as_secs() / 3600,
                wait.as_secs() % 3600 / 60
            ),
        ),
    ];
    if let Some(error) = &state.last_error {
        rows.insert(2, row("Last error", error.clone()));
    }

    print!("{}", render_table(&[Column::left("Field"), Column::left("Value")], &rows));
    Ok(())
}

fn row(field: &str, value: String) -> Vec<String> {
    vec![field.to_string(), value]
}
