//! CLI Report Subcommands

use anyhow::Result;
use clap::Subcommand;
use signalforge_core::Report;

use crate::context::AppContext;
use crate::terminal_output::{note_info, render_table, Column};

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Show the newest report and its anomalies
    Latest {
        /// Print the raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// List report dates on disk
    List,
}

pub async fn run(cmd: ReportCommands, ctx: &AppContext) -> Result<()> {
    let reports = ctx.reports();
    match cmd {
        ReportCommands::Latest { json } => {
            let Some(report) = reports.latest().await else {
                note_info(&format!("No reports in {}", reports.dir().display()));
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
        }
        ReportCommands::List => {
            let dates = reports.list_dates().await;
            if dates.is_empty() {
                note_info(&format!("No reports in {}", reports.dir().display()));
            }
            for date in dates {
                println!("  {date}");
            }
        }
    }
    Ok(())
}

fn print_summary(report: &Report) {
    let s = &report.signals;
    println!(
        "\nReport {} (generated {})\n",
        report.date,
        report.generated_at.format("%H:%M:%S UTC")
    );
    println!(
        "  repos {}  programs {}  protocols {}  tokens {}",
        s.leading.repos.len(),
        s.coincident.programs.len(),
        s.confirming.protocols.len(),
        s.confirming.tokens.len()
    );
    println!("  anomalies {}\n", report.anomalies.len());
    if report.anomalies.is_empty() {
        return;
    }

    let rows: Vec<Vec<String>> = report
        .anomalies
        .iter()
        .map(|a| {
            vec![
                a.family.to_string(),
                a.entity.clone(),
                a.metric.clone(),
                format!("{:.2}", a.value),
                format!("{:.2}", a.mean),
                format!("{:+.2}", a.z_score),
            ]
        })
        .collect();
    let columns = [
        Column::left("Family"),
        Column::left("Entity"),
        Column::left("Metric"),
        Column::right("Value"),
        Column::right("Mean"),
        Column::right("Z"),
    ];
    print!("{}", render_table(&columns, &rows));
}
