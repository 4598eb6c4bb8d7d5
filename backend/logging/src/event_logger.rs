//! Cycle Event Logger
//!
//! One structured record per heartbeat lifecycle step, emitted on the
//! `cycle_events` target so it can be filtered out of the general stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    Started {
        cycle: u64,
    },
    Skipped {
        holder_pid: Option<u32>,
    },
    Completed {
        cycle: u64,
        produced_report: bool,
        duration_ms: u64,
        summary: Option<String>,
    },
    Failed {
        cycle: u64,
        consecutive_failures: u32,
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct CycleLogEntry {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub event: CycleEvent,
}

impl CycleLogEntry {
    pub fn new(event: CycleEvent) -> Self {
        Self { pid: std::process::id(), timestamp: Utc::now(), event: redact(event) }
    }
}

fn redact(mut event: CycleEvent) -> CycleEvent {
    match &mut event {
        CycleEvent::Failed { error, .. } => *error = redact_sensitive_data(error),
        CycleEvent::Completed { summary: Some(summary), .. } => {
            *summary = redact_sensitive_data(summary)
        }
        _ => {}
    }
    event
}

pub struct EventLogger;

impl EventLogger {
    pub fn log_event(event: CycleEvent) {
        let entry = CycleLogEntry::new(event);
        match serde_json::to_string(&entry) {
            Ok(json) => info!(target: "cycle_events", event = %json, "Heartbeat cycle event"),
            Err(_) => info!(target: "cycle_events", event = ?entry, "Heartbeat cycle event"),
        }
    }
}
